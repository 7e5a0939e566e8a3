//! Middleware for protecting authenticated routes.
//!
//! Requests reach a protected handler only while the session cache holds a
//! backend-confirmed identity; advisory sessions restored from the mirror do not
//! count.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::errors::PortalError;
use crate::state::AppState;

pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, PortalError> {
    if !state.cache.snapshot().is_signed_in() {
        debug!(path = %request.uri().path(), "authentication required");
        return Err(PortalError::Unauthenticated);
    }
    Ok(next.run(request).await)
}
