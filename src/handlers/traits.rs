//! The URL handler capability contract
//!
//! A handler is an in-process download backend that claims URLs it knows how
//! to fetch and runs the transfers itself, as opposed to delegating to the
//! external engine daemon. Handlers keep their own job tables; the
//! reconciliation loop polls `active_jobs` / `completed_jobs` to mirror them
//! into the shared store.

use super::types::{CompletedTransfer, ProbeInfo, TransferSnapshot};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("failed to start transfer: {0}")]
    Start(String),
    #[error("no such job: {0}")]
    NotFound(String),
    #[error("backing tool unavailable: {0}")]
    Unavailable(String),
}

/// A download backend for one family of URLs.
///
/// Implementations must be cheap to query: `progress`, `active_jobs` and
/// `completed_jobs` are hit every reconciliation tick and must not touch the
/// network. `can_handle` may probe the remote end but has to come back within
/// a bounded timeout, claiming nothing on failure.
#[async_trait]
pub trait UrlHandler: Send + Sync {
    /// Stable identifier, also used as the namespace tag on mirrored jobs.
    fn name(&self) -> &'static str;

    /// Whether this handler wants the URL. Must answer false on any probe
    /// failure so dispatch falls through to the next candidate.
    async fn can_handle(&self, url: &str) -> bool;

    /// Inspect the resource without starting a transfer.
    async fn probe(&self, url: &str) -> Result<ProbeInfo, HandlerError>;

    /// Begin downloading into `dest_dir` and return the handler-local job id.
    /// The job must be observable via `progress` before this returns.
    async fn start(&self, url: &str, dest_dir: &Path) -> Result<String, HandlerError>;

    /// Current state of one job, active or completed.
    async fn progress(&self, job_id: &str) -> Result<TransferSnapshot, HandlerError>;

    /// Pause the job. Returns false when the handler cannot pause.
    async fn pause(&self, job_id: &str) -> bool {
        let _ = job_id;
        false
    }

    /// Resume a paused job. Returns false when the handler cannot resume.
    async fn resume(&self, job_id: &str) -> bool {
        let _ = job_id;
        false
    }

    /// Request cancellation. Cooperative: the transfer stops at the next
    /// checkpoint. Returns false when the job is not active.
    async fn cancel(&self, job_id: &str) -> bool;

    async fn active_jobs(&self) -> Vec<TransferSnapshot>;

    async fn completed_jobs(&self) -> Vec<CompletedTransfer>;
}
