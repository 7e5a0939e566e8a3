//! Profile viewer data.
//!
//! Right after a registration the viewer shows the stashed registration result,
//! which can be read only once. Later visits fall back to the profile of the
//! signed-in administrator.

use adapters::Record;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::mirror::RegistrationHandoff;
use crate::auth::models::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Registration,
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub source: ProfileSource,
    pub data: Record,
}

pub fn load_profile(handoff: &RegistrationHandoff, session: &Session) -> Option<ProfileView> {
    if let Some(data) = handoff.take() {
        debug!("showing freshly submitted registration");
        return Some(ProfileView {
            source: ProfileSource::Registration,
            data,
        });
    }

    if !session.is_signed_in() {
        return None;
    }
    let mut data = session.profile.clone().unwrap_or_default();
    if let Some(email) = session.user.as_ref().and_then(|user| user.email.clone()) {
        data.entry("school_email").or_insert(Value::String(email));
    }
    Some(ProfileView {
        source: ProfileSource::Session,
        data,
    })
}
