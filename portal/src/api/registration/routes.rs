//! Defines the HTTP route the registration form submits to.

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;

use super::handlers::submit;
use crate::state::AppState;

/// Badge, photo and supporting document together.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn registration_router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
