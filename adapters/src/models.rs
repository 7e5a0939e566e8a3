//! Generic data models for the `adapters` crate.
//!
//! These models define common, abstracted representations of backend entities
//! (identities, auth events, record queries, blob uploads) that any adapter
//! implementation accepts or returns, so the portal can stay independent of the
//! concrete service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// A row or profile as returned by the record store.
pub type Record = Map<String, Value>;

/// Fixed coordinates of the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub url: Url,
    pub public_key: String,
}

impl BackendEndpoint {
    pub fn new(url: Url, public_key: impl Into<String>) -> Self {
        Self {
            url,
            public_key: public_key.into(),
        }
    }
}

/// Identity record issued by the backend. Only `id` is relied upon; the rest is
/// carried through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub user_metadata: Record,
    #[serde(flatten)]
    pub extra: Record,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_owned),
            user_metadata: Record::new(),
            extra: Record::new(),
        }
    }

    /// String field from `user_metadata`, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(Value::as_str)
    }
}

/// Auth state change pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Identity),
    TokenRefreshed(Identity),
    SignedOut,
}

impl AuthEvent {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthEvent::SignedIn(identity) | AuthEvent::TokenRefreshed(identity) => Some(identity),
            AuthEvent::SignedOut => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthEvent::SignedOut => "SIGNED_OUT",
        }
    }
}

/// Email/password pair. The email is normalised on construction.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: impl Into<String>) -> Self {
        Self {
            email: normalize_email(email),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub credentials: Credentials,
    /// Stored by the service as the identity's `user_metadata`.
    pub metadata: Record,
}

/// What the service returned for a sign-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignUpOutcome {
    /// The created account; absent when the service withholds it until confirmation.
    pub identity: Option<Identity>,
    /// The account was confirmed on creation and the service issued a session for it.
    pub session_issued: bool,
}

impl SignUpOutcome {
    pub fn pending(identity: Option<Identity>) -> Self {
        Self {
            identity,
            session_issued: false,
        }
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            session_issued: true,
        }
    }
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select against a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub table: String,
    /// Column list in the service's select syntax, `*` for all.
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    /// Expect exactly one row; zero rows is [`crate::AdapterError::NotFound`].
    pub single: bool,
}

impl RecordQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_owned(),
            filters: Vec::new(),
            order: None,
            single: false,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BlobUpload {
    pub bucket: String,
    pub path: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: u32,
    pub upsert: bool,
}

impl BlobUpload {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
            bytes,
            content_type: None,
            cache_control: 3600,
            upsert: false,
        }
    }
}
