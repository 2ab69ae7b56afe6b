//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use placebot_chat::SessionRegistry;
use placebot_core::config::PlacebotConfig;

/// Shared application state.
///
/// Cloned into every handler task; the registry is the only mutable part
/// and guards itself.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<PlacebotConfig>,
    /// Live conversation sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            config: Arc::new(sessions.config().clone()),
            sessions: Arc::new(sessions),
            start_time: Instant::now(),
        }
    }
}
