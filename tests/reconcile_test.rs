//! Reconciliation loop integration tests
//!
//! A scripted engine and a scripted handler stand in for the real backends;
//! each test sets up what the sources report, drives ticks by hand and
//! checks the resulting store state.

use async_trait::async_trait;
use chrono::Utc;
use downlink::engine::{EngineClient, EngineError, EngineJobSnapshot};
use downlink::handlers::{
    CompletedTransfer, HandlerError, HandlerRegistry, ProbeInfo, TransferSnapshot, UrlHandler,
};
use downlink::jobs::{JobStore, Reconciler, handler_job_id};
use downlink::observability::Metrics;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct ScriptedEngine {
    jobs: Mutex<Vec<EngineJobSnapshot>>,
    fail: Mutex<bool>,
}

impl ScriptedEngine {
    fn report(&self, jobs: Vec<EngineJobSnapshot>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    fn fail_next(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl EngineClient for ScriptedEngine {
    async fn list_all(&self) -> Result<Vec<EngineJobSnapshot>, EngineError> {
        if *self.fail.lock().unwrap() {
            return Err(EngineError::Timeout);
        }
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn submit(&self, _url: &str, _dest_dir: &str) -> Result<String, EngineError> {
        Ok("unused".to_string())
    }

    async fn pause(&self, _gid: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn resume(&self, _gid: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn remove(&self, _gid: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedHandler {
    active: Mutex<Vec<TransferSnapshot>>,
    completed: Mutex<Vec<CompletedTransfer>>,
}

impl ScriptedHandler {
    fn report_active(&self, jobs: Vec<TransferSnapshot>) {
        *self.active.lock().unwrap() = jobs;
    }

    fn report_completed(&self, jobs: Vec<CompletedTransfer>) {
        *self.completed.lock().unwrap() = jobs;
    }
}

#[async_trait]
impl UrlHandler for ScriptedHandler {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn can_handle(&self, _url: &str) -> bool {
        false
    }

    async fn probe(&self, url: &str) -> Result<ProbeInfo, HandlerError> {
        Err(HandlerError::Probe(url.to_string()))
    }

    async fn start(&self, _url: &str, _dest_dir: &Path) -> Result<String, HandlerError> {
        Err(HandlerError::Start("scripted".to_string()))
    }

    async fn progress(&self, job_id: &str) -> Result<TransferSnapshot, HandlerError> {
        Err(HandlerError::NotFound(job_id.to_string()))
    }

    async fn cancel(&self, _job_id: &str) -> bool {
        false
    }

    async fn active_jobs(&self) -> Vec<TransferSnapshot> {
        self.active.lock().unwrap().clone()
    }

    async fn completed_jobs(&self) -> Vec<CompletedTransfer> {
        self.completed.lock().unwrap().clone()
    }
}

fn engine_snap(gid: &str, status: &str, completed: u64, total: u64) -> EngineJobSnapshot {
    EngineJobSnapshot {
        gid: gid.to_string(),
        name: format!("{gid}.bin"),
        status: status.to_string(),
        completed_bytes: completed,
        total_bytes: total,
        rate_bps: 512,
        eta_seconds: None,
        file_path: format!("/downloads/{gid}.bin"),
    }
}

fn transfer_snap(id: &str, progress: f64) -> TransferSnapshot {
    TransferSnapshot {
        id: id.to_string(),
        name: format!("{id}.mp4"),
        status: "downloading".to_string(),
        progress,
        rate_bps: 256,
        eta_seconds: Some(30),
        completed_bytes: 0,
        total_bytes: 0,
        error: None,
        created_at: Utc::now(),
    }
}

struct Rig {
    store: Arc<JobStore>,
    engine: Arc<ScriptedEngine>,
    handler: Arc<ScriptedHandler>,
    reconciler: Reconciler,
    metrics: Arc<Metrics>,
}

fn rig() -> Rig {
    let store = Arc::new(JobStore::new());
    let engine = Arc::new(ScriptedEngine::default());
    let handler = Arc::new(ScriptedHandler::default());
    let metrics = Arc::new(Metrics::new());

    let registry = Arc::new(RwLock::new(HandlerRegistry::from_handlers(vec![
        handler.clone() as Arc<dyn UrlHandler>,
    ])));

    let reconciler = Reconciler::new(
        store.clone(),
        Some(engine.clone() as Arc<dyn EngineClient>),
        registry,
        metrics.clone(),
        Duration::from_millis(1_000),
    );

    Rig {
        store,
        engine,
        handler,
        reconciler,
        metrics,
    }
}

#[tokio::test]
async fn test_engine_job_lifecycle() {
    let r = rig();

    r.engine.report(vec![engine_snap("g1", "active", 100, 1000)]);
    r.reconciler.tick().await;

    let active = r.store.list_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].progress, 0.1);

    r.engine.report(vec![engine_snap("g1", "complete", 1000, 1000)]);
    r.reconciler.tick().await;

    assert!(r.store.list_active().await.is_empty());
    let completed = r.store.list_completed().await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, "g1");
    assert_eq!(r.metrics.snapshot().jobs_completed, 1);
}

#[tokio::test]
async fn test_completion_by_bytes_without_status() {
    let r = rig();

    // The status stays "active" but the byte counters reach the total.
    r.engine.report(vec![engine_snap("g1", "active", 500, 1000)]);
    r.reconciler.tick().await;
    r.engine.report(vec![engine_snap("g1", "active", 1000, 1000)]);
    r.reconciler.tick().await;

    assert!(r.store.list_active().await.is_empty());
    assert_eq!(r.store.list_completed().await.len(), 1);
}

#[tokio::test]
async fn test_orphan_removed_on_following_tick() {
    let r = rig();

    r.engine.report(vec![
        engine_snap("g1", "active", 100, 1000),
        engine_snap("g2", "active", 100, 1000),
    ]);
    r.reconciler.tick().await;
    assert_eq!(r.store.list_active().await.len(), 2);

    // g2 vanishes without ever signaling completion.
    r.engine.report(vec![engine_snap("g1", "active", 200, 1000)]);
    r.reconciler.tick().await;

    let active = r.store.list_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "g1");
    // An orphan is dropped, never promoted.
    assert!(r.store.list_completed().await.is_empty());
}

#[tokio::test]
async fn test_completion_wins_over_orphan_cleanup() {
    let r = rig();

    r.engine.report(vec![engine_snap("g1", "active", 100, 1000)]);
    r.reconciler.tick().await;

    // Final tick both reports completion and stops reporting the job
    // afterwards; the completed record must survive.
    r.engine.report(vec![engine_snap("g1", "complete", 1000, 1000)]);
    r.reconciler.tick().await;
    r.engine.report(vec![]);
    r.reconciler.tick().await;

    assert!(r.store.list_active().await.is_empty());
    assert_eq!(r.store.list_completed().await.len(), 1);
}

#[tokio::test]
async fn test_engine_failure_keeps_state_and_handler_pass_runs() {
    let r = rig();

    r.engine.report(vec![engine_snap("g1", "active", 100, 1000)]);
    r.reconciler.tick().await;

    r.engine.fail_next(true);
    r.handler.report_active(vec![transfer_snap("h1", 0.3)]);
    r.reconciler.tick().await;

    // Engine state is stale but intact; the handler mirror still landed.
    let active = r.store.list_active().await;
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|j| j.id == "g1"));
    assert!(active.iter().any(|j| j.id == handler_job_id("h1")));
    assert_eq!(r.metrics.snapshot().reconcile_errors, 1);
}

#[tokio::test]
async fn test_handler_job_mirrored_and_completed() {
    let r = rig();

    r.handler.report_active(vec![transfer_snap("h1", 0.4)]);
    r.reconciler.tick().await;

    let active = r.store.list_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, handler_job_id("h1"));
    assert_eq!(active[0].handler.as_deref(), Some("scripted"));

    r.handler.report_active(vec![]);
    r.handler.report_completed(vec![CompletedTransfer {
        id: "h1".to_string(),
        name: "h1.mp4".to_string(),
        total_bytes: 2_048,
        file_path: "/downloads/h1.mp4".to_string(),
        completed_at: Utc::now(),
    }]);

    // Handlers keep reporting completed jobs forever; completion must be
    // counted exactly once.
    r.reconciler.tick().await;
    r.reconciler.tick().await;

    assert!(r.store.list_active().await.is_empty());
    assert_eq!(r.store.list_completed().await.len(), 1);
    assert_eq!(r.metrics.snapshot().jobs_completed, 1);
}

#[tokio::test]
async fn test_cancelled_handler_job_disappears() {
    let r = rig();

    r.handler.report_active(vec![transfer_snap("h1", 0.4)]);
    r.reconciler.tick().await;
    assert_eq!(r.store.list_active().await.len(), 1);

    // Cancelled transfers drop out of the handler table without a
    // completed record.
    r.handler.report_active(vec![]);
    r.reconciler.tick().await;

    assert!(r.store.list_active().await.is_empty());
    assert!(r.store.list_completed().await.is_empty());
}

#[tokio::test]
async fn test_active_and_completed_are_exclusive() {
    let r = rig();

    r.engine.report(vec![engine_snap("g1", "complete", 10, 10)]);
    r.handler.report_active(vec![transfer_snap("h1", 0.5)]);
    r.reconciler.tick().await;

    // A stale "active" report for an already-completed id is ignored.
    r.engine.report(vec![engine_snap("g1", "active", 5, 10)]);
    r.reconciler.tick().await;

    let active = r.store.list_active().await;
    let completed = r.store.list_completed().await;
    assert_eq!(active.len(), 1);
    assert_eq!(completed.len(), 1);
    assert!(active.iter().all(|a| completed.iter().all(|c| c.id != a.id)));
}

#[tokio::test]
async fn test_tick_counter_increments() {
    let r = rig();

    r.reconciler.tick().await;
    r.reconciler.tick().await;
    r.reconciler.tick().await;

    assert_eq!(r.metrics.snapshot().reconcile_ticks, 3);
}
