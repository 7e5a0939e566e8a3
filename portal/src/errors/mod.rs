//! Global application error types and handlers.
//!
//! This module defines the error type returned by every request handler and the
//! startup path, and maps each variant to an HTTP status with a JSON body the pages
//! can show as-is.

use adapters::AdapterError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::acquisition::AcquisitionError;
use crate::auth::errors::AuthError;
use crate::auth::mirror::StoreError;
use crate::config::ConfigError;
use crate::services::registration::RegistrationError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("backend request failed: {0}")]
    Backend(#[from] AdapterError),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid form upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Auth(AuthError::Rejected { .. }) => StatusCode::UNAUTHORIZED,
            PortalError::Auth(AuthError::Offline) => StatusCode::SERVICE_UNAVAILABLE,
            PortalError::Auth(AuthError::Backend(_)) | PortalError::Backend(_) => {
                StatusCode::BAD_GATEWAY
            }
            PortalError::Registration(err) => err.status(),
            PortalError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PortalError::BadRequest(_) | PortalError::Multipart(_) => StatusCode::BAD_REQUEST,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
