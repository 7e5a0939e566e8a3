//! Defines the HTTP routes for the administrator dashboard.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use super::handlers::{create_event, dashboard, school_players};
use crate::auth::middleware::require_auth;
use crate::state::AppState;

pub fn dashboard_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/events", post(create_event))
        .route("/schools/:school_id/players", get(school_players))
        .route_layer(from_fn_with_state(state, require_auth))
}
