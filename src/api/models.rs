//! API models for the downlink HTTP surface.
//!
//! The read side returns the merged job view straight from the store
//! ([`JobRecord`] / [`CompletedRecord`] serialize as-is); the structs here
//! cover request payloads and the envelope types the endpoints wrap their
//! answers in.

use crate::humanize;
use crate::jobs::{CompletedRecord, JobRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    /// Handler name, or "engine" for daemon-side downloads.
    pub backend: String,
}

/// One active job with the ETA rendered for display next to the raw
/// seconds value.
#[derive(Debug, Serialize)]
pub struct ActiveDownload {
    #[serde(flatten)]
    pub record: JobRecord,
    pub eta: String,
}

impl From<JobRecord> for ActiveDownload {
    fn from(record: JobRecord) -> Self {
        let eta = humanize::format_duration(record.eta_seconds);
        Self { record, eta }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadsResponse {
    pub active: Vec<ActiveDownload>,
    pub completed: Vec<CompletedRecord>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    /// Also remove the file from disk, not just the history entry.
    #[serde(default)]
    pub delete_file: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_count: usize,
    pub completed_count: usize,
    pub aggregate_rate_bps: u64,
    pub aggregate_rate: String,
}

#[derive(Debug, Serialize)]
pub struct HandlersResponse {
    pub handlers: Vec<String>,
    pub engine_available: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub download_dir: String,
    pub engine_enabled: bool,
    pub reconcile_interval_ms: u64,
    pub handlers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
