//! Administrator dashboard data.
//!
//! Loads the four tables the dashboard shows, derives the headline statistics and
//! creates event records.

use adapters::{AdapterError, BackendAdapter, Filter, Record, RecordQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use tracing::{info, instrument};

const SCHOOLS_TABLE: &str = "schools";
const PLAYERS_TABLE: &str = "players";
const CONTACTS_TABLE: &str = "contacts";
const EVENTS_TABLE: &str = "events";

/// Players embed the name of the school they belong to.
const PLAYER_COLUMNS: &str = "*, schools(school_name)";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardData {
    pub schools: Vec<Record>,
    pub players: Vec<Record>,
    pub contacts: Vec<Record>,
    pub events: Vec<Record>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub schools: usize,
    pub players: usize,
    pub upcoming_events: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    /// ISO date (`YYYY-MM-DD`), optionally followed by a time.
    #[serde(alias = "date")]
    pub event_date: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewEvent {
    fn into_record(self) -> Record {
        let mut record = Record::new();
        record.insert("title".to_owned(), Value::String(self.title));
        record.insert("location".to_owned(), self.location.into());
        record.insert("event_date".to_owned(), Value::String(self.event_date));
        record.insert("description".to_owned(), self.description.into());
        record
    }
}

impl DashboardData {
    #[instrument(skip_all)]
    pub async fn load(backend: &dyn BackendAdapter) -> Result<Self, AdapterError> {
        let schools = RecordQuery::table(SCHOOLS_TABLE).order_by("created_at", false);
        let players = RecordQuery::table(PLAYERS_TABLE)
            .columns(PLAYER_COLUMNS)
            .order_by("created_at", false);
        let contacts = RecordQuery::table(CONTACTS_TABLE).order_by("created_at", false);
        let events = RecordQuery::table(EVENTS_TABLE).order_by("event_date", true);

        let (schools, players, contacts, events) = tokio::try_join!(
            backend.select(&schools),
            backend.select(&players),
            backend.select(&contacts),
            backend.select(&events),
        )?;

        info!(
            schools = schools.len(),
            players = players.len(),
            contacts = contacts.len(),
            events = events.len(),
            "dashboard data loaded"
        );
        Ok(Self {
            schools,
            players,
            contacts,
            events,
        })
    }

    /// Events dated on or after `today` count as upcoming.
    pub fn stats(&self, today: Date) -> DashboardStats {
        let today = today.to_string();
        let upcoming_events = self
            .events
            .iter()
            .filter_map(|event| event.get("event_date").and_then(Value::as_str))
            .filter(|date| date.get(..10).unwrap_or(*date) >= today.as_str())
            .count();

        DashboardStats {
            schools: self.schools.len(),
            players: self.players.len(),
            upcoming_events,
        }
    }

    /// Case-insensitive match on school name, region or district.
    pub fn search_schools(&self, term: &str) -> Vec<&Record> {
        let term = term.trim().to_lowercase();
        self.schools
            .iter()
            .filter(|school| {
                ["school_name", "region", "district"].iter().any(|column| {
                    school
                        .get(*column)
                        .and_then(Value::as_str)
                        .is_some_and(|value| value.to_lowercase().contains(&term))
                })
            })
            .collect()
    }
}

/// Players registered by one school, newest first.
#[instrument(skip(backend))]
pub async fn players_for_school(
    backend: &dyn BackendAdapter,
    school_id: &str,
) -> Result<Vec<Record>, AdapterError> {
    let query = RecordQuery::table(PLAYERS_TABLE)
        .columns(PLAYER_COLUMNS)
        .filter(Filter::eq("school_id", school_id))
        .order_by("created_at", false);
    backend.select(&query).await
}

#[instrument(skip_all, fields(title = %event.title))]
pub async fn create_event(backend: &dyn BackendAdapter, event: NewEvent) -> Result<Record, AdapterError> {
    let stored = backend.insert(EVENTS_TABLE, event.into_record()).await?;
    info!("event created");
    Ok(stored)
}
