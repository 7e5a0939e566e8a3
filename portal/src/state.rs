//! Shared application state handed to every request handler.

use std::sync::Arc;

use adapters::BackendHandle;

use crate::auth::errors::AuthError;
use crate::auth::mirror::RegistrationHandoff;
use crate::auth::service::SessionCache;
use crate::config::PortalConfig;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SessionCache>,
    pub handoff: RegistrationHandoff,
    pub config: Arc<PortalConfig>,
}

impl AppState {
    pub fn new(cache: Arc<SessionCache>, handoff: RegistrationHandoff, config: PortalConfig) -> Self {
        Self {
            cache,
            handoff,
            config: Arc::new(config),
        }
    }

    /// The acquired backend, or [`AuthError::Offline`] while running degraded.
    pub fn backend(&self) -> Result<BackendHandle, AuthError> {
        self.cache.backend().ok_or(AuthError::Offline)
    }
}
