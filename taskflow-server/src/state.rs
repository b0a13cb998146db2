//! Shared application state for the HTTP server.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use taskflow::Orchestrator;
use taskflow::io::config::ServerConfig;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Idle interval for the event stream's keep-alive comment.
    pub heartbeat_interval: Duration,
    pub database_path: PathBuf,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: &ServerConfig) -> Self {
        Self {
            orchestrator,
            heartbeat_interval: config.heartbeat_interval(),
            database_path: config.database_path.clone(),
            started_at: Instant::now(),
        }
    }
}
