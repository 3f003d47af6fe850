use std::sync::Arc;

use crate::config::AppConfig;
use crate::run::RunController;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(controller: Arc<RunController>, config: AppConfig) -> Self {
        Self { controller, config }
    }
}
