//! In-memory adapter implementation used by tests.
//!
//! This file contains a complete implementation of the `BackendAdapter` trait that keeps
//! accounts, tables and blobs in process memory, plus hooks for scripting failures and
//! pushing auth events the way the hosted service would.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::AdapterError;
use crate::models::{
    normalize_email, AuthEvent, BlobUpload, Credentials, Filter, Identity, Record, RecordQuery,
    SignUpOutcome, SignUpRequest,
};
use crate::BackendAdapter;

struct Account {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct Failures {
    identity: Option<String>,
    next_sign_out: Option<String>,
    reads: HashSet<String>,
    writes: HashSet<String>,
    uploads: bool,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    current: Option<Identity>,
    tables: HashMap<String, Vec<Record>>,
    blobs: HashMap<(String, String), Vec<u8>>,
    password_resets: Vec<(String, String)>,
    next_id: u64,
    identity_calls: usize,
    identity_latency: Duration,
    auto_confirm: bool,
    failures: Failures,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an account that can sign in with `password`.
    pub fn with_account(self, identity: Identity, password: &str) -> Self {
        if let Some(email) = identity.email.clone() {
            self.lock().accounts.insert(
                normalize_email(&email),
                Account {
                    identity,
                    password: password.to_owned(),
                },
            );
        }
        self
    }

    /// New accounts are confirmed on creation and signed in, like a project with
    /// email confirmation turned off.
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.lock().auto_confirm = enabled;
    }

    /// Sets the identity bound to the current token without emitting an event.
    pub fn set_current(&self, identity: Option<Identity>) {
        self.lock().current = identity;
    }

    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        self.lock()
            .tables
            .entry(table.to_owned())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .get(&(bucket.to_owned(), path.to_owned()))
            .cloned()
    }

    pub fn blob_paths(&self, bucket: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .lock()
            .blobs
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, path)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn password_resets(&self) -> Vec<(String, String)> {
        self.lock().password_resets.clone()
    }

    /// Number of `current_identity` calls served so far.
    pub fn identity_calls(&self) -> usize {
        self.lock().identity_calls
    }

    /// Delays every `current_identity` call, simulating a network round trip.
    pub fn set_identity_latency(&self, latency: Duration) {
        self.lock().identity_latency = latency;
    }

    /// Every `current_identity` call fails with `message` until cleared with `None`.
    pub fn fail_identity(&self, message: Option<&str>) {
        self.lock().failures.identity = message.map(str::to_owned);
    }

    /// The next `sign_out` call fails with `message`.
    pub fn fail_next_sign_out(&self, message: &str) {
        self.lock().failures.next_sign_out = Some(message.to_owned());
    }

    pub fn fail_reads(&self, table: &str) {
        self.lock().failures.reads.insert(table.to_owned());
    }

    pub fn fail_writes(&self, table: &str) {
        self.lock().failures.writes.insert(table.to_owned());
    }

    pub fn fail_uploads(&self) {
        self.lock().failures.uploads = true;
    }

    /// Delivers an auth event as if the service pushed it.
    pub fn push_event(&self, event: AuthEvent) {
        self.lock().current = event.identity().cloned();
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    async fn current_identity(&self) -> Result<Option<Identity>, AdapterError> {
        let latency = self.lock().identity_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        state.identity_calls += 1;
        if let Some(message) = state.failures.identity.clone() {
            return Err(AdapterError::Request(message));
        }
        Ok(state.current.clone())
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AdapterError> {
        let identity = {
            let mut state = self.lock();
            let identity = match state.accounts.get(&credentials.email) {
                Some(account) if account.password == credentials.password => {
                    account.identity.clone()
                }
                _ => {
                    return Err(AdapterError::Auth {
                        message: "Invalid login credentials".to_owned(),
                    })
                }
            };
            state.current = Some(identity.clone());
            identity
        };
        let _ = self.events.send(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AdapterError> {
        let mut state = self.lock();
        let email = request.credentials.email.clone();
        if state.accounts.contains_key(&email) {
            return Err(AdapterError::Auth {
                message: "User already registered".to_owned(),
            });
        }

        let mut identity = Identity::new(state.next_id("user"), Some(&email));
        identity.user_metadata = request.metadata.clone();
        state.accounts.insert(
            email,
            Account {
                identity: identity.clone(),
                password: request.credentials.password.clone(),
            },
        );
        if !state.auto_confirm {
            return Ok(SignUpOutcome::pending(Some(identity)));
        }

        state.current = Some(identity.clone());
        drop(state);
        let _ = self.events.send(AuthEvent::SignedIn(identity.clone()));
        Ok(SignUpOutcome::signed_in(identity))
    }

    async fn sign_out(&self) -> Result<(), AdapterError> {
        {
            let mut state = self.lock();
            if let Some(message) = state.failures.next_sign_out.take() {
                return Err(AdapterError::Status {
                    status: 503,
                    message,
                });
            }
            state.current = None;
        }
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AdapterError> {
        self.lock()
            .password_resets
            .push((email.to_owned(), redirect_to.to_owned()));
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(&self, query: &RecordQuery) -> Result<Vec<Record>, AdapterError> {
        let state = self.lock();
        if state.failures.reads.contains(&query.table) {
            return Err(AdapterError::Status {
                status: 500,
                message: format!("read from {} failed", query.table),
            });
        }

        let mut rows: Vec<Record> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        if query.single {
            if rows.is_empty() {
                return Err(AdapterError::NotFound {
                    table: query.table.clone(),
                });
            }
            rows.truncate(1);
        }

        Ok(rows
            .into_iter()
            .map(|row| project(row, &query.columns))
            .collect())
    }

    async fn insert(&self, table: &str, mut row: Record) -> Result<Record, AdapterError> {
        let mut state = self.lock();
        if state.failures.writes.contains(table) {
            return Err(AdapterError::Status {
                status: 500,
                message: format!("insert into {table} failed"),
            });
        }
        if !row.contains_key("id") {
            let id = state.next_id(table);
            row.insert("id".to_owned(), Value::String(id));
        }
        state
            .tables
            .entry(table.to_owned())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, changes: Record, filter: &Filter) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if state.failures.writes.contains(table) {
            return Err(AdapterError::Status {
                status: 500,
                message: format!("update of {table} failed"),
            });
        }
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches(row, filter)) {
                for (key, value) in &changes {
                    row.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn upload_blob(&self, upload: BlobUpload) -> Result<String, AdapterError> {
        let mut state = self.lock();
        if state.failures.uploads {
            return Err(AdapterError::Status {
                status: 500,
                message: "storage unavailable".to_owned(),
            });
        }
        let key = (upload.bucket.clone(), upload.path.clone());
        if state.blobs.contains_key(&key) && !upload.upsert {
            return Err(AdapterError::Status {
                status: 409,
                message: "The resource already exists".to_owned(),
            });
        }
        state.blobs.insert(key, upload.bytes);
        Ok(format!("{}/{}", upload.bucket, upload.path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

fn matches(row: &Record, filter: &Filter) -> bool {
    row.get(&filter.column) == Some(&filter.value)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Keeps the plain columns named in a select list; embedded relations are ignored.
fn project(row: Record, columns: &str) -> Record {
    if columns.trim() == "*" || columns.contains('*') {
        return row;
    }
    let wanted: HashSet<&str> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.contains('('))
        .collect();
    row.into_iter()
        .filter(|(key, _)| wanted.contains(key.as_str()))
        .collect()
}
