//! USRA school portal.
//!
//! Wires the session cache, the page-level services and the loopback HTTP API the
//! registration, sign-in, dashboard and profile pages talk to.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod services;
pub mod state;
pub mod telemetry;

use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;

use crate::api::dashboard::routes::dashboard_router;
use crate::api::profile::routes::profile_router;
use crate::api::registration::routes::registration_router;
use crate::auth::routes::auth_router;
use crate::middleware::request_tracing;
use crate::state::AppState;

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .nest("/api/auth", auth_router())
        .nest("/api/dashboard", dashboard_router(state.clone()))
        .nest("/api/registration", registration_router())
        .nest("/api/profile", profile_router())
        .layer(from_fn(request_tracing))
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "Welcome to the USRA school portal!"
}
