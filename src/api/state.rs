use std::sync::Arc;

use crate::config::Config;
use crate::jobs::{Coordinator, JobStore};
use crate::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<JobStore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        coordinator: Arc<Coordinator>,
        store: Arc<JobStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            coordinator,
            store,
            metrics,
        }
    }
}
