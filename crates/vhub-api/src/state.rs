//! Application state.

use std::sync::Arc;

use vhub_engine::AnalysisContext;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub context: Arc<AnalysisContext>,
}

impl AppState {
    pub fn new(config: ApiConfig, context: Arc<AnalysisContext>) -> Self {
        Self { config, context }
    }
}
