//! Shared application state for the HTTP handlers.

use std::sync::Arc;

use pagesmith_core::store::StateStore;
use pagesmith_core::Orchestrator;

use crate::config::ServerConfig;

/// Cloned into every handler; everything inside is shared.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Orchestrator>,
    pub store: Arc<dyn StateStore>,
    pub config: Arc<ServerConfig>,
    /// Worker tasks running in this process, reported by `/health`.
    pub workers: usize,
}

impl AppState {
    pub fn new(
        engine: Arc<Orchestrator>,
        store: Arc<dyn StateStore>,
        config: ServerConfig,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            store,
            config: Arc::new(config),
            workers,
        }
    }
}
