//! Shared job-table types for URL handlers
//!
//! Every concrete handler owns a [`JobTable`]: the handler-local map of
//! active and completed transfers. Transfer tasks write their own entries;
//! the reconciliation loop and progress queries read them. The table is
//! guarded by a plain mutex; critical sections are short field updates and
//! the guard is never held across an await point.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const STATUS_DOWNLOADING: &str = "downloading";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_CANCELLED: &str = "cancelled";

/// Best-effort metadata returned by `probe` without starting a transfer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeInfo {
    pub name: String,
    /// 0 when the source does not report a size
    pub size: u64,
    pub kind: String,
}

/// One in-flight transfer as reported by its owning handler.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    pub progress: f64,
    pub rate_bps: u64,
    pub eta_seconds: Option<u64>,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A finished transfer retained in the handler's completed map.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub id: String,
    pub name: String,
    pub total_bytes: u64,
    pub file_path: String,
    pub completed_at: DateTime<Utc>,
}

struct ActiveEntry {
    snapshot: TransferSnapshot,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct TableInner {
    active: HashMap<String, ActiveEntry>,
    completed: HashMap<String, CompletedTransfer>,
}

/// Handler-local job bookkeeping shared between the handler facade and its
/// spawned transfer tasks.
#[derive(Default)]
pub struct JobTable {
    inner: Mutex<TableInner>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // A poisoned lock only means a transfer task panicked mid-update;
        // the table itself stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new transfer and return its id plus the cancellation flag
    /// the transfer task must poll. The entry is visible to `progress`
    /// before the caller spawns anything.
    pub fn insert(&self, name: &str) -> (String, Arc<AtomicBool>) {
        let id = Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));

        let snapshot = TransferSnapshot {
            id: id.clone(),
            name: name.to_string(),
            status: STATUS_DOWNLOADING.to_string(),
            progress: 0.0,
            rate_bps: 0,
            eta_seconds: None,
            completed_bytes: 0,
            total_bytes: 0,
            error: None,
            created_at: Utc::now(),
        };

        self.lock().active.insert(
            id.clone(),
            ActiveEntry {
                snapshot,
                cancel: cancel.clone(),
            },
        );

        (id, cancel)
    }

    /// Record the resolved name and total size once known. A zero total
    /// means "still unknown" and never overwrites an earlier value.
    pub fn set_metadata(&self, id: &str, name: &str, total_bytes: u64) {
        if let Some(entry) = self.lock().active.get_mut(id) {
            entry.snapshot.name = name.to_string();
            if total_bytes > 0 {
                entry.snapshot.total_bytes = total_bytes;
            }
        }
    }

    /// Per-chunk progress update from the transfer task.
    pub fn record_progress(
        &self,
        id: &str,
        completed_bytes: u64,
        total_bytes: u64,
        rate_bps: u64,
    ) {
        if let Some(entry) = self.lock().active.get_mut(id) {
            let snap = &mut entry.snapshot;
            snap.completed_bytes = completed_bytes;
            if total_bytes > 0 {
                snap.total_bytes = total_bytes;
                snap.progress = (completed_bytes as f64 / total_bytes as f64).clamp(0.0, 1.0);
            }
            snap.rate_bps = rate_bps;
            snap.eta_seconds = if rate_bps > 0 && total_bytes > completed_bytes {
                Some((total_bytes - completed_bytes) / rate_bps)
            } else {
                None
            };
        }
    }

    /// Override the progress ratio directly (backends that report percent).
    pub fn set_progress_ratio(&self, id: &str, ratio: f64) {
        if let Some(entry) = self.lock().active.get_mut(id) {
            entry.snapshot.progress = ratio.clamp(0.0, 1.0);
        }
    }

    /// Override the ETA (backends that report it directly).
    pub fn set_eta(&self, id: &str, eta_seconds: Option<u64>) {
        if let Some(entry) = self.lock().active.get_mut(id) {
            entry.snapshot.eta_seconds = eta_seconds;
        }
    }

    /// Transfer failed: keep the entry active with an error status so the
    /// failure is observable via polling. The task has no caller to throw to.
    pub fn mark_error(&self, id: &str, message: String) {
        if let Some(entry) = self.lock().active.get_mut(id) {
            entry.snapshot.status = STATUS_ERROR.to_string();
            entry.snapshot.rate_bps = 0;
            entry.snapshot.eta_seconds = None;
            entry.snapshot.error = Some(message);
        }
    }

    /// Request cooperative cancellation. Returns false when the id is not
    /// active (already finished, errored out and removed, or unknown).
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().active.get_mut(id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::Relaxed);
                entry.snapshot.status = STATUS_CANCELLED.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop an active entry without completing it (observed cancellation).
    pub fn remove_active(&self, id: &str) {
        self.lock().active.remove(id);
    }

    /// Move an active entry to the completed map. No-op for cancelled
    /// entries: a cancelled transfer never produces a completed record.
    pub fn complete(&self, id: &str, file_path: String) {
        let mut inner = self.lock();
        let Some(entry) = inner.active.remove(id) else {
            return;
        };
        if entry.cancel.load(Ordering::Relaxed) {
            return;
        }

        let snap = entry.snapshot;
        inner.completed.insert(
            id.to_string(),
            CompletedTransfer {
                id: id.to_string(),
                name: snap.name,
                total_bytes: snap.total_bytes.max(snap.completed_bytes),
                file_path,
                completed_at: Utc::now(),
            },
        );
    }

    /// Progress for one job: active entry as-is, completed entries
    /// synthesized as a finished snapshot.
    pub fn progress(&self, id: &str) -> Option<TransferSnapshot> {
        let inner = self.lock();
        if let Some(entry) = inner.active.get(id) {
            return Some(entry.snapshot.clone());
        }
        inner.completed.get(id).map(|done| TransferSnapshot {
            id: done.id.clone(),
            name: done.name.clone(),
            status: "completed".to_string(),
            progress: 1.0,
            rate_bps: 0,
            eta_seconds: Some(0),
            completed_bytes: done.total_bytes,
            total_bytes: done.total_bytes,
            error: None,
            created_at: done.completed_at,
        })
    }

    pub fn active_snapshots(&self) -> Vec<TransferSnapshot> {
        self.lock()
            .active
            .values()
            .map(|e| e.snapshot.clone())
            .collect()
    }

    pub fn completed_snapshots(&self) -> Vec<CompletedTransfer> {
        self.lock().completed.values().cloned().collect()
    }
}
