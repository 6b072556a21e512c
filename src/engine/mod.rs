//! External download engine adapter
//!
//! The engine is a separately-running download daemon (aria2) controlled over
//! JSON-RPC. The reconciliation loop treats it as one more source of job
//! state next to the in-process handlers; it is queried, never locked.

mod aria2;

pub use aria2::Aria2Client;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine RPC failed: {0}")]
    Rpc(String),
    #[error("engine RPC timed out")]
    Timeout,
    #[error("unexpected engine response: {0}")]
    Protocol(String),
}

/// One engine-side job as reported by the daemon, normalized to the units
/// the job store works in (plain byte counts, [0,1] ratio, ETA in seconds).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineJobSnapshot {
    pub gid: String,
    pub name: String,
    /// Engine-specific status tag ("active", "paused", "complete", "removed", ...)
    pub status: String,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub rate_bps: u64,
    pub eta_seconds: Option<u64>,
    pub file_path: String,
}

impl EngineJobSnapshot {
    /// Completion ratio derived from byte counts, clamped to [0,1].
    /// Unknown total (0) reports 0.0 rather than NaN.
    pub fn progress_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.completed_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Clamp a backend-reported progress value into a [0,1] ratio.
///
/// Backends disagree on units: some report a ratio, some a percentage.
/// Values above 1.0 are treated as percentages; negatives clamp to zero.
pub fn normalize_ratio(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let ratio = if raw > 1.0 { raw / 100.0 } else { raw };
    ratio.clamp(0.0, 1.0)
}

/// Control interface to the external download daemon.
///
/// All calls carry a bounded timeout so a stalled daemon surfaces as an
/// error instead of wedging a reconciliation tick.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// All jobs the engine currently knows about (active, waiting, stopped).
    async fn list_all(&self) -> Result<Vec<EngineJobSnapshot>, EngineError>;

    /// Submit a URL for download, returning the engine-issued GID.
    async fn submit(&self, url: &str, dest_dir: &str) -> Result<String, EngineError>;

    async fn pause(&self, gid: &str) -> Result<(), EngineError>;
    async fn resume(&self, gid: &str) -> Result<(), EngineError>;
    async fn remove(&self, gid: &str) -> Result<(), EngineError>;
}
