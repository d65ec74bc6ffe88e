//! Shared server state

use std::sync::Arc;

use aroma_core::{Broadcaster, FanController};

/// Shared application state
///
/// Both members synchronize internally, so handlers share them without an
/// outer lock.
pub struct AppState {
    /// Fan channels and their timers
    pub controller: Arc<FanController>,

    /// Status feed for WebSocket clients
    pub broadcaster: Arc<Broadcaster>,
}

impl AppState {
    pub fn new(controller: Arc<FanController>) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&controller)));
        Self {
            controller,
            broadcaster,
        }
    }

    /// Push a fresh snapshot right after a state change
    pub async fn publish_status(&self) {
        let report = self.broadcaster.tick().await;
        tracing::debug!("State change pushed to {} subscribers", report.delivered);
    }
}
