//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    reconcile_ticks: AtomicU64,
    reconcile_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn reconcile_tick(&self) {
        self.reconcile_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_error(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "reconcile_errors", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            reconcile_ticks: self.reconcile_ticks.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub reconcile_ticks: u64,
    pub reconcile_errors: u64,
}
