//! Application state.

use std::sync::Arc;

use bgswap_matting::RembgClient;
use bgswap_worker::{JobRunner, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Create application state backed by the rembg matting service.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let matter = Arc::new(RembgClient::from_env()?);
        let runner = JobRunner::new(WorkerConfig::from_env(), matter)?;

        Ok(Self::with_runner(config, Arc::new(runner)))
    }

    /// Create application state around an existing runner.
    pub fn with_runner(config: ApiConfig, runner: Arc<JobRunner>) -> Self {
        Self { config, runner }
    }
}
