//! Control facade routing user commands to the owning backend
//!
//! Submissions are dispatched handler-first with the engine as fallback;
//! pause/resume/cancel are routed by the id namespace. The outcome type
//! separates "the backend cannot do that" from "no such job" so callers
//! can answer precisely.

use crate::engine::{EngineClient, EngineError};
use crate::handlers::{HandlerRegistry, UrlHandler};
use crate::jobs::store::{CompletedRecord, JobStore, StoreStats};
use crate::jobs::{handler_job_id, handler_local_id};
use crate::observability::Metrics;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The owning backend accepted the command.
    Ok,
    /// The job exists but its backend does not support the operation.
    Unsupported,
    /// No backend knows this job id.
    NotFound,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no such job: {0}")]
    NotFound(String),
    #[error("{0} backend unavailable")]
    BackendUnavailable(&'static str),
    #[error("no handler accepts this URL and no engine fallback is available")]
    DispatchFailed,
}

/// Result of a successful submission: the externally visible job id and
/// the backend that took the download.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub id: String,
    pub backend: String,
}

enum ControlOp {
    Pause,
    Resume,
    Cancel,
}

pub struct Coordinator {
    store: Arc<JobStore>,
    registry: Arc<RwLock<HandlerRegistry>>,
    engine: Option<Arc<dyn EngineClient>>,
    download_dir: PathBuf,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<RwLock<HandlerRegistry>>,
        engine: Option<Arc<dyn EngineClient>>,
        download_dir: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            download_dir,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub async fn handler_names(&self) -> Vec<&'static str> {
        self.registry.read().await.names()
    }

    pub fn engine_available(&self) -> bool {
        self.engine.is_some()
    }

    /// Submit a URL: first handler that claims it wins; URLs nobody claims
    /// (or whose handler fails to start) fall back to the engine daemon.
    pub async fn submit(&self, url: &str) -> Result<SubmitReceipt, ControlError> {
        let registry = self.registry.read().await.clone();

        if let Some(handler) = registry.dispatch(url).await {
            match handler.start(url, &self.download_dir).await {
                Ok(local_id) => {
                    self.metrics.job_submitted();
                    info!(url, handler = handler.name(), "Download started via handler");
                    return Ok(SubmitReceipt {
                        id: handler_job_id(&local_id),
                        backend: handler.name().to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        url,
                        handler = handler.name(),
                        %err,
                        "Handler failed to start, falling back to engine"
                    );
                }
            }
        }

        let engine = self
            .engine
            .as_ref()
            .ok_or(ControlError::DispatchFailed)?;

        let gid = engine
            .submit(url, &self.download_dir.to_string_lossy())
            .await
            .map_err(|err| {
                warn!(url, %err, "Engine submission failed");
                ControlError::BackendUnavailable("engine")
            })?;

        self.metrics.job_submitted();
        info!(url, gid, "Download started via engine");
        Ok(SubmitReceipt {
            id: gid,
            backend: "engine".to_string(),
        })
    }

    pub async fn pause(&self, id: &str) -> Result<ControlOutcome, ControlError> {
        self.control(id, ControlOp::Pause).await
    }

    pub async fn resume(&self, id: &str) -> Result<ControlOutcome, ControlError> {
        self.control(id, ControlOp::Resume).await
    }

    pub async fn cancel(&self, id: &str) -> Result<ControlOutcome, ControlError> {
        let outcome = self.control(id, ControlOp::Cancel).await?;
        if outcome == ControlOutcome::Ok && handler_local_id(id).is_none() {
            // The engine forgets removed GIDs; drop the record now instead
            // of waiting for orphan cleanup to notice.
            self.store.remove_active(id).await;
        }
        Ok(outcome)
    }

    async fn control(&self, id: &str, op: ControlOp) -> Result<ControlOutcome, ControlError> {
        if let Some(local_id) = handler_local_id(id) {
            return Ok(self.control_handler_job(local_id, op).await);
        }

        let engine = self
            .engine
            .as_ref()
            .ok_or(ControlError::BackendUnavailable("engine"))?;

        let result = match op {
            ControlOp::Pause => engine.pause(id).await,
            ControlOp::Resume => engine.resume(id).await,
            ControlOp::Cancel => engine.remove(id).await,
        };

        match result {
            Ok(()) => Ok(ControlOutcome::Ok),
            // The daemon answers unknown GIDs with an RPC-level error.
            Err(EngineError::Rpc(message)) => {
                debug!(id, message, "Engine rejected control command");
                Ok(ControlOutcome::NotFound)
            }
            Err(err @ (EngineError::Timeout | EngineError::Protocol(_))) => {
                warn!(id, %err, "Engine unreachable for control command");
                Err(ControlError::BackendUnavailable("engine"))
            }
        }
    }

    /// Scan handlers for the owner of a handler-local id, then apply the op.
    async fn control_handler_job(&self, local_id: &str, op: ControlOp) -> ControlOutcome {
        let registry = self.registry.read().await.clone();

        for handler in registry.list() {
            // Ownership means the job is in this handler's active table;
            // finished transfers are controlled via the completed surface.
            match handler.progress(local_id).await {
                Ok(snapshot) if snapshot.status != "completed" => {}
                _ => continue,
            }
            let accepted = match op {
                ControlOp::Pause => handler.pause(local_id).await,
                ControlOp::Resume => handler.resume(local_id).await,
                ControlOp::Cancel => handler.cancel(local_id).await,
            };
            return if accepted {
                ControlOutcome::Ok
            } else {
                ControlOutcome::Unsupported
            };
        }

        ControlOutcome::NotFound
    }

    /// Remove a completed download from history, optionally deleting the
    /// file on disk. A file that is already gone is not an error.
    pub async fn delete_completed(
        &self,
        id: &str,
        delete_file: bool,
    ) -> Result<CompletedRecord, ControlError> {
        let record = self
            .store
            .remove_completed(id)
            .await
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;

        if delete_file && !record.file_path.is_empty() {
            match tokio::fs::remove_file(&record.file_path).await {
                Ok(()) => {
                    info!(id, path = %record.file_path, "Deleted downloaded file")
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(id, path = %record.file_path, "File already removed")
                }
                Err(err) => {
                    warn!(id, path = %record.file_path, %err, "Failed to delete file")
                }
            }
        }

        Ok(record)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Rebuild the registry, re-running handler availability checks.
    pub async fn reload_handlers(&self, config: &crate::config::HandlersConfig) {
        let rebuilt = HandlerRegistry::build(config).await;
        info!(handlers = ?rebuilt.names(), "Handler registry reloaded");
        *self.registry.write().await = rebuilt;
    }
}
