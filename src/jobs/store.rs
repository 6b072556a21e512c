//! Merged job store
//!
//! Two tables: active jobs and completed jobs, keyed by job id. Every entry
//! is owned by exactly one table; moving to completed removes the active
//! entry in the same critical section, and a completed id is never
//! resurrected. The reconciliation loop is the only writer for
//! reconciliation-driven changes; user-driven removals (cancel, delete)
//! go through the same lock.

use crate::engine::{EngineJobSnapshot, normalize_ratio};
use crate::jobs::{HANDLER_ID_PREFIX, handler_job_id, handler_local_id};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, RwLockWriteGuard};

const UNKNOWN_NAME: &str = "Unknown";

/// One in-flight download in the merged view.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    /// Completion ratio in [0,1]; never decreases while the job is active.
    pub progress: f64,
    pub rate_bps: u64,
    pub eta_seconds: Option<u64>,
    pub completed_bytes: u64,
    /// 0 when the source has not reported a size yet.
    pub total_bytes: u64,
    pub status: String,
    /// Owning handler name; None for engine-side jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One finished download.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRecord {
    pub id: String,
    pub name: String,
    pub total_bytes: u64,
    pub completed_at: DateTime<Utc>,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub active_count: usize,
    pub completed_count: usize,
    /// Sum of per-job rates across active downloads.
    pub aggregate_rate_bps: u64,
}

/// Redundant completion detection: any one signal is enough, so a backend
/// that omits one field still gets its jobs settled.
fn completion_signaled(status: &str, ratio: f64, completed_bytes: u64, total_bytes: u64) -> bool {
    status == "complete"
        || status == "removed"
        || ratio >= 1.0
        || (total_bytes > 0 && completed_bytes >= total_bytes)
}

/// The raw tables plus the pure merge operations the reconciler applies.
/// Kept synchronous so the merge rules are testable without a runtime.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    active: HashMap<String, JobRecord>,
    completed: HashMap<String, CompletedRecord>,
}

impl Tables {
    /// Merge one engine-side report. Returns true when this report moved
    /// the job to completed.
    pub(crate) fn apply_engine_snapshot(
        &mut self,
        snap: &EngineJobSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        // Completed is terminal; late duplicate reports are ignored.
        if self.completed.contains_key(&snap.gid) {
            return false;
        }

        let ratio = snap.progress_ratio();
        if completion_signaled(&snap.status, ratio, snap.completed_bytes, snap.total_bytes) {
            let existing = self.active.remove(&snap.gid);

            // The final report may have dropped the size; fall back to what
            // we saw while the job was active.
            let mut total_bytes = snap.total_bytes;
            let mut name = snap.name.clone();
            if let Some(record) = &existing {
                if total_bytes == 0 {
                    total_bytes = record.total_bytes;
                }
                if name == UNKNOWN_NAME {
                    name = record.name.clone();
                }
            }

            self.completed.insert(
                snap.gid.clone(),
                CompletedRecord {
                    id: snap.gid.clone(),
                    name,
                    total_bytes: total_bytes.max(snap.completed_bytes),
                    completed_at: now,
                    file_path: snap.file_path.clone(),
                    handler: None,
                },
            );
            return true;
        }

        match self.active.get_mut(&snap.gid) {
            Some(record) => {
                record.name = snap.name.clone();
                record.progress = record.progress.max(ratio);
                record.rate_bps = snap.rate_bps;
                record.eta_seconds = snap.eta_seconds;
                record.completed_bytes = snap.completed_bytes;
                if snap.total_bytes > 0 {
                    record.total_bytes = snap.total_bytes;
                }
                record.status = snap.status.clone();
                record.updated_at = now;
            }
            None => {
                self.active.insert(
                    snap.gid.clone(),
                    JobRecord {
                        id: snap.gid.clone(),
                        name: snap.name.clone(),
                        progress: ratio,
                        rate_bps: snap.rate_bps,
                        eta_seconds: snap.eta_seconds,
                        completed_bytes: snap.completed_bytes,
                        total_bytes: snap.total_bytes,
                        status: snap.status.clone(),
                        handler: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        false
    }

    /// Drop engine-side active entries the engine no longer reports.
    /// Runs after completion detection so a job that finished and was
    /// purged in the same tick still lands in completed.
    pub(crate) fn remove_engine_orphans(&mut self, seen: &HashSet<String>) -> usize {
        let before = self.active.len();
        self.active
            .retain(|id, _| id.starts_with(HANDLER_ID_PREFIX) || seen.contains(id));
        before - self.active.len()
    }

    /// Mirror one handler-reported active transfer into the merged view.
    pub(crate) fn mirror_handler_active(
        &mut self,
        handler: &str,
        snap: &crate::handlers::TransferSnapshot,
        now: DateTime<Utc>,
    ) {
        let key = handler_job_id(&snap.id);
        if self.completed.contains_key(&key) {
            return;
        }

        let ratio = normalize_ratio(snap.progress);
        match self.active.get_mut(&key) {
            Some(record) => {
                record.name = snap.name.clone();
                record.progress = record.progress.max(ratio);
                record.rate_bps = snap.rate_bps;
                record.eta_seconds = snap.eta_seconds;
                record.completed_bytes = snap.completed_bytes;
                if snap.total_bytes > 0 {
                    record.total_bytes = snap.total_bytes;
                }
                record.status = snap.status.clone();
                record.updated_at = now;
            }
            None => {
                self.active.insert(
                    key.clone(),
                    JobRecord {
                        id: key,
                        name: snap.name.clone(),
                        progress: ratio,
                        rate_bps: snap.rate_bps,
                        eta_seconds: snap.eta_seconds,
                        completed_bytes: snap.completed_bytes,
                        total_bytes: snap.total_bytes,
                        status: snap.status.clone(),
                        handler: Some(handler.to_string()),
                        created_at: snap.created_at,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Mirror one handler-reported completed transfer. Idempotent: handlers
    /// keep reporting their completed jobs every tick. Returns true only on
    /// the first sighting.
    pub(crate) fn mirror_handler_completed(
        &mut self,
        handler: &str,
        done: &crate::handlers::CompletedTransfer,
    ) -> bool {
        let key = handler_job_id(&done.id);
        self.active.remove(&key);

        if self.completed.contains_key(&key) {
            return false;
        }

        self.completed.insert(
            key.clone(),
            CompletedRecord {
                id: key,
                name: done.name.clone(),
                total_bytes: done.total_bytes,
                completed_at: done.completed_at,
                file_path: done.file_path.clone(),
                handler: Some(handler.to_string()),
            },
        );
        true
    }

    /// Drop this handler's active mirrors for jobs it no longer reports
    /// (cancelled transfers vanish from the handler table without
    /// completing).
    pub(crate) fn remove_handler_orphans(
        &mut self,
        handler: &str,
        seen_local: &HashSet<String>,
    ) -> usize {
        let before = self.active.len();
        self.active.retain(|id, record| {
            if record.handler.as_deref() != Some(handler) {
                return true;
            }
            match handler_local_id(id) {
                Some(local) => seen_local.contains(local),
                None => true,
            }
        });
        before - self.active.len()
    }

    fn list_active(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.active.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    fn list_completed(&self) -> Vec<CompletedRecord> {
        let mut records: Vec<CompletedRecord> = self.completed.values().cloned().collect();
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(a.id.cmp(&b.id)));
        records
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            active_count: self.active.len(),
            completed_count: self.completed.len(),
            aggregate_rate_bps: self.active.values().map(|r| r.rate_bps).sum(),
        }
    }
}

/// Shared, concurrency-safe wrapper around [`Tables`].
#[derive(Debug, Default)]
pub struct JobStore {
    tables: RwLock<Tables>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write access for the reconciler, scoped to one tick.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().await
    }

    pub async fn list_active(&self) -> Vec<JobRecord> {
        self.tables.read().await.list_active()
    }

    pub async fn list_completed(&self) -> Vec<CompletedRecord> {
        self.tables.read().await.list_completed()
    }

    pub async fn get_completed(&self, id: &str) -> Option<CompletedRecord> {
        self.tables.read().await.completed.get(id).cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        self.tables.read().await.stats()
    }

    /// Drop an active record immediately (engine-side cancel); the entry
    /// would otherwise linger until the next tick notices the removal.
    pub async fn remove_active(&self, id: &str) -> Option<JobRecord> {
        self.tables.write().await.active.remove(id)
    }

    /// Remove a completed record from history.
    pub async fn remove_completed(&self, id: &str) -> Option<CompletedRecord> {
        self.tables.write().await.completed.remove(id)
    }
}
