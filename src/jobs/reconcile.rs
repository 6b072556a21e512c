//! Periodic reconciliation of job state
//!
//! Every tick the reconciler pulls the full job list from the engine daemon
//! and from each registered handler, merges everything into the shared
//! store, detects completions and drops orphaned entries. Sources are
//! isolated: an engine RPC failure or a misbehaving handler costs that
//! source one tick of freshness, nothing more.

use crate::engine::EngineClient;
use crate::handlers::{HandlerRegistry, UrlHandler};
use crate::humanize;
use crate::jobs::store::JobStore;
use crate::observability::Metrics;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Reconciler {
    store: Arc<JobStore>,
    engine: Option<Arc<dyn EngineClient>>,
    registry: Arc<RwLock<HandlerRegistry>>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<JobStore>,
        engine: Option<Arc<dyn EngineClient>>,
        registry: Arc<RwLock<HandlerRegistry>>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            metrics,
            interval,
        }
    }

    /// Run the loop on a background task until the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Reconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        // A slow tick must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One reconciliation pass. Public so tests can drive ticks directly.
    pub async fn tick(&self) {
        self.metrics.reconcile_tick();

        if let Some(engine) = &self.engine {
            match engine.list_all().await {
                Ok(snapshots) => self.merge_engine(snapshots).await,
                Err(err) => {
                    // Existing records keep their last-known state.
                    warn!(%err, "Engine poll failed, skipping engine pass");
                    self.metrics.reconcile_error();
                }
            }
        }

        let handlers: Vec<Arc<dyn UrlHandler>> =
            self.registry.read().await.list().to_vec();
        for handler in handlers {
            self.merge_handler(handler.as_ref()).await;
        }
    }

    async fn merge_engine(&self, snapshots: Vec<crate::engine::EngineJobSnapshot>) {
        let now = Utc::now();
        let seen: HashSet<String> = snapshots.iter().map(|s| s.gid.clone()).collect();

        let mut tables = self.store.write().await;
        for snap in &snapshots {
            if tables.apply_engine_snapshot(snap, now) {
                self.metrics.job_completed();
                info!(
                    gid = %snap.gid,
                    name = %snap.name,
                    size = %humanize::format_bytes(snap.total_bytes.max(snap.completed_bytes)),
                    "Download completed"
                );
            }
        }

        let removed = tables.remove_engine_orphans(&seen);
        if removed > 0 {
            debug!(removed, "Dropped engine jobs no longer reported");
        }
    }

    async fn merge_handler(&self, handler: &dyn UrlHandler) {
        let name = handler.name();
        let active = handler.active_jobs().await;
        let completed = handler.completed_jobs().await;
        let now = Utc::now();

        let seen: HashSet<String> = active.iter().map(|s| s.id.clone()).collect();

        let mut tables = self.store.write().await;
        for snap in &active {
            tables.mirror_handler_active(name, snap, now);
        }
        for done in &completed {
            if tables.mirror_handler_completed(name, done) {
                self.metrics.job_completed();
                info!(
                    handler = name,
                    job_id = %done.id,
                    name = %done.name,
                    size = %humanize::format_bytes(done.total_bytes),
                    "Download completed"
                );
            }
        }

        let removed = tables.remove_handler_orphans(name, &seen);
        if removed > 0 {
            debug!(handler = name, removed, "Dropped handler jobs no longer reported");
        }
    }
}
