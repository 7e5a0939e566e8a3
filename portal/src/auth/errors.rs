//! Custom error types specific to authentication failures.
//!
//! Service messages for rejected credentials are translated into the wording the
//! sign-in page shows; transport failures keep their source for logging.

use adapters::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication backend is unavailable, running in offline mode")]
    Offline,

    /// The service refused the request; `message` is already user-facing.
    #[error("{message}")]
    Rejected { message: String },

    #[error("authentication request failed: {0}")]
    Backend(#[source] AdapterError),
}

impl AuthError {
    pub fn from_adapter(err: AdapterError) -> Self {
        match err {
            AdapterError::Auth { message } => AuthError::Rejected {
                message: friendly_message(&message),
            },
            other => AuthError::Backend(other),
        }
    }
}

/// Maps a service error message to the text shown to the user.
pub fn friendly_message(raw: &str) -> String {
    let mapped = match raw {
        "Invalid login credentials" => {
            "Invalid email or password. Please check your credentials and try again."
        }
        "Email not confirmed" => {
            "Please check your email and click the confirmation link before signing in."
        }
        "Too many requests" => "Too many sign-in attempts. Please wait a few minutes and try again.",
        "User already registered" => {
            "An account with this email already exists. Try signing in instead."
        }
        "Signup disabled" => "New account registration is currently disabled.",
        "Invalid email" => "Please enter a valid email address.",
        "Weak password" => "Password is too weak. Please choose a stronger password.",
        "" => "An error occurred. Please try again.",
        other => other,
    };
    mapped.to_owned()
}
