//! Custom error types specific to the `adapters` crate.
//!
//! This module defines errors that can occur while constructing a backend client,
//! issuing identity calls, querying records, or uploading blobs, providing a unified
//! error handling mechanism for all backend interactions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The client could not be built from the configured endpoint and key.
    #[error("backend client construction failed: {0}")]
    Construction(String),

    /// The service rejected the credentials or the token.
    #[error("{message}")]
    Auth { message: String },

    /// The request never produced a response.
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("no matching record in {table}")]
    NotFound { table: String },

    #[error("no active session")]
    NotAuthenticated,
}

impl AdapterError {
    /// Message as reported by the service, used for user-facing mapping.
    pub fn service_message(&self) -> String {
        match self {
            AdapterError::Auth { message } | AdapterError::Status { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::Decode(err.to_string())
        } else {
            AdapterError::Request(err.to_string())
        }
    }
}
