//! Shared application state

use std::sync::Arc;

use redfishd_domain::RedfishService;

use crate::auth::Authenticator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RedfishService>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(service: Arc<RedfishService>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            service,
            authenticator,
        }
    }

    /// Value of the `Server` response header.
    pub fn server_name(&self) -> &str {
        &self.service.config().server.server_name
    }
}
