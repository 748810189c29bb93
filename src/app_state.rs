use std::sync::Arc;

use crate::services::{payment_api::PaymentApi, poller::PollerSettings, sessions::SessionRegistry};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        api: Arc<dyn PaymentApi>,
        settings: PollerSettings,
        session_retention: std::time::Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new(api, settings, session_retention)),
        }
    }
}
