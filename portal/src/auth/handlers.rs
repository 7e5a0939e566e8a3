//! Handler functions for authentication-related API endpoints.
//!
//! These functions process the sign-in page's requests (sign in, create account,
//! password reset), the navigation bar's logout and session polling, and delegate
//! to the shared `SessionCache`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::models::{
    PasswordResetRequest, SessionResponse, SignInRequest, SignUpBody, SignUpResponse,
    StatusResponse,
};
use crate::errors::PortalError;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 6;

pub async fn session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse::new(state.cache.phase(), state.cache.snapshot()))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SessionResponse>, PortalError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(PortalError::BadRequest(
            "Please enter both email and password".to_owned(),
        ));
    }

    let session = state.cache.sign_in(&request.email, &request.password).await?;
    Ok(Json(SessionResponse::new(state.cache.phase(), session)))
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpBody>,
) -> Result<(StatusCode, Json<SignUpResponse>), PortalError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(PortalError::BadRequest(
            "Please enter both email and password to create an account".to_owned(),
        ));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PortalError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let outcome = state
        .cache
        .sign_up(&request.email, &request.password, request.metadata)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            user: outcome.identity,
            confirmation_pending: !outcome.session_issued,
        }),
    ))
}

pub async fn sign_out(State(state): State<AppState>) -> Result<Json<SessionResponse>, PortalError> {
    let session = state.cache.sign_out().await?;
    Ok(Json(SessionResponse::new(state.cache.phase(), session)))
}

pub async fn password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<StatusResponse>, PortalError> {
    let redirect = state.config.password_reset_redirect();
    state
        .cache
        .request_password_reset(&request.email, &redirect)
        .await?;
    Ok(Json(StatusResponse {
        message: "Password reset email sent! Check your inbox.".to_owned(),
    }))
}
