//! Data structures for authentication-related entities.
//!
//! This module defines the session snapshot shared with observers, the bootstrap
//! phase, the navigation model derived from a session, and the request/response
//! bodies of the auth endpoints.

use adapters::{Identity, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mirror::PersistedSnapshot;

/// The in-memory record of whether a user is signed in and their profile.
///
/// `authenticated` is only ever set from an identity the backend confirmed. A
/// session restored from the persistence mirror carries `advisory = true` and is
/// never authenticated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    pub authenticated: bool,
    pub user: Option<Identity>,
    pub profile: Option<Record>,
    pub advisory: bool,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn confirmed(user: Identity, profile: Option<Record>) -> Self {
        Self {
            authenticated: true,
            user: Some(user),
            profile,
            advisory: false,
        }
    }

    /// Display hint rebuilt from the mirror while the backend is unreachable.
    pub fn advisory(snapshot: PersistedSnapshot) -> Self {
        Self {
            authenticated: false,
            user: snapshot.user,
            profile: snapshot.profile,
            advisory: true,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.authenticated && self.user.is_some()
    }

    pub fn persisted(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            user: self.user.clone(),
            profile: self.profile.clone(),
        }
    }

    fn profile_str(&self, key: &str) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|profile| profile.get(key))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Name shown in the navigation bar.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.profile_str("admin_full_name") {
            return name.to_owned();
        }
        let user = self.user.as_ref();
        if let Some(name) = user.and_then(|u| u.metadata_str("full_name")) {
            return name.to_owned();
        }
        user.and_then(|u| u.email.as_deref())
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_owned()
    }

    pub fn navigation(&self) -> NavigationView {
        let has_user = self.user.is_some();
        NavigationView {
            signed_in: self.is_signed_in(),
            advisory: self.advisory && has_user,
            display_name: has_user.then(|| self.display_name()),
            email: self.user.as_ref().and_then(|u| u.email.clone()),
            avatar_url: self.profile_str("profile_photo_url").map(str::to_owned),
            show_dashboard: self.is_signed_in(),
            show_sign_in: !self.is_signed_in(),
        }
    }
}

/// Bootstrap state of the session cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Acquiring,
    Ready,
    Degraded,
    Authenticated,
    Unauthenticated,
}

/// What the navigation bar renders for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationView {
    pub signed_in: bool,
    pub advisory: bool,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub show_dashboard: bool,
    pub show_sign_in: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub phase: SessionPhase,
    pub session: Session,
    pub navigation: NavigationView,
}

impl SessionResponse {
    pub fn new(phase: SessionPhase, session: Session) -> Self {
        let navigation = session.navigation();
        Self {
            phase,
            session,
            navigation,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpBody {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub metadata: Record,
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user: Option<Identity>,
    /// The account exists but the email address still has to be confirmed.
    pub confirmation_pending: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: String,
}
