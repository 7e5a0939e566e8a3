//! Defines the HTTP route for the profile viewer.

use axum::routing::get;
use axum::Router;

use super::handlers::profile;
use crate::state::AppState;

pub fn profile_router() -> Router<AppState> {
    Router::new().route("/", get(profile))
}
