//! Handler functions for the administrator dashboard API.
//!
//! These functions load the dashboard tables through `services::dashboard`,
//! compute the headline statistics for today and create events.

use adapters::Record;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::PortalError;
use crate::services::dashboard::{self, DashboardData, DashboardStats, NewEvent};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// Narrows the school list by name, region or district.
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub stats: DashboardStats,
    #[serde(flatten)]
    pub data: DashboardData,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, PortalError> {
    let backend = state.backend()?;
    let mut data = DashboardData::load(backend.as_ref()).await?;
    let stats = data.stats(OffsetDateTime::now_utc().date());

    if let Some(term) = query.search.filter(|term| !term.trim().is_empty()) {
        let schools: Vec<Record> = data.search_schools(&term).into_iter().cloned().collect();
        data.schools = schools;
    }
    Ok(Json(DashboardResponse { stats, data }))
}

pub async fn school_players(
    State(state): State<AppState>,
    Path(school_id): Path<String>,
) -> Result<Json<Vec<Record>>, PortalError> {
    let backend = state.backend()?;
    let players = dashboard::players_for_school(backend.as_ref(), &school_id).await?;
    Ok(Json(players))
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(event): Json<NewEvent>,
) -> Result<(StatusCode, Json<Record>), PortalError> {
    if event.title.trim().is_empty() || event.event_date.trim().is_empty() {
        return Err(PortalError::BadRequest(
            "An event needs a title and a date".to_owned(),
        ));
    }
    let backend = state.backend()?;
    let stored = dashboard::create_event(backend.as_ref(), event).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}
