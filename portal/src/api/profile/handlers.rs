//! Handler for the profile viewer.

use axum::extract::State;
use axum::Json;

use crate::errors::PortalError;
use crate::services::profile::{load_profile, ProfileView};
use crate::state::AppState;

pub async fn profile(State(state): State<AppState>) -> Result<Json<ProfileView>, PortalError> {
    load_profile(&state.handoff, &state.cache.snapshot())
        .map(Json)
        .ok_or_else(|| {
            PortalError::NotFound(
                "No registration data found. Please complete the registration process to view your profile".to_owned(),
            )
        })
}
