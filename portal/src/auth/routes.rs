//! Defines the HTTP routes specifically for authentication.
//!
//! These routes handle sign-in, account creation, logout, password reset and the
//! session endpoint the navigation bar polls. They are nested under `/api/auth`.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{password_reset, session, sign_in, sign_out, sign_up};
use crate::state::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/session", get(session))
        .route("/signin", post(sign_in))
        .route("/signup", post(sign_up))
        .route("/signout", post(sign_out))
        .route("/password-reset", post(password_reset))
}
