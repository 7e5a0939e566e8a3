//! REST adapter implementation for the hosted identity and data backend.
//!
//! This file contains the concrete implementation of the `BackendAdapter` trait over
//! the service's HTTP endpoints (auth, row store and object storage), the probe used
//! to detect when the service is reachable, and the factory that builds the client
//! from the fixed endpoint and public key.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::errors::AdapterError;
use crate::models::{
    AuthEvent, BackendEndpoint, BlobUpload, Credentials, Filter, Identity, Record, RecordQuery,
    SignUpOutcome, SignUpRequest,
};
use crate::{BackendAdapter, BackendFactory, BackendHandle, FactoryProbe};

const EVENT_CAPACITY: usize = 16;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Token pair held for the lifetime of the process. Never persisted.
#[derive(Debug, Clone, Deserialize)]
struct TokenSession {
    access_token: String,
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(alias = "msg", alias = "error_description", alias = "error")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredObject {
    #[serde(rename = "Key")]
    key: Option<String>,
}

pub struct RestBackend {
    http: Client,
    base: Url,
    public_key: String,
    session: RwLock<Option<TokenSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    pub fn connect(endpoint: &BackendEndpoint) -> Result<Self, AdapterError> {
        let base = normalized_base(&endpoint.url)?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&endpoint.public_key)
            .map_err(|err| AdapterError::Construction(format!("invalid public key: {err}")))?;
        headers.insert("apikey", key);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AdapterError::Construction(err.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            http,
            base,
            public_key: endpoint.public_key.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    fn url(&self, path: &str) -> Result<Url, AdapterError> {
        self.base
            .join(path)
            .map_err(|err| AdapterError::Request(format!("invalid path {path}: {err}")))
    }

    fn bearer(&self) -> String {
        let token = self
            .session
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.access_token.clone()));
        format!("Bearer {}", token.unwrap_or_else(|| self.public_key.clone()))
    }

    fn has_session(&self) -> bool {
        self.session
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn store_session(&self, session: Option<TokenSession>) {
        if let Ok(mut guard) = self.session.write() {
            *guard = session;
        }
    }

    fn emit(&self, event: AuthEvent) {
        debug!(event = event.name(), "emitting auth event");
        // No receivers is not an error: nobody is listening yet.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl BackendAdapter for RestBackend {
    #[instrument(skip_all)]
    async fn current_identity(&self) -> Result<Option<Identity>, AdapterError> {
        if !self.has_session() {
            return Ok(None);
        }

        let response = self
            .http
            .get(self.url("auth/v1/user")?)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("access token rejected, dropping local session");
            self.store_session(None);
            return Ok(None);
        }

        let identity: Identity = check(response).await?.json().await?;
        Ok(Some(identity))
    }

    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AdapterError> {
        let mut url = self.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await?;

        let session: TokenSession = check_auth(response).await?.json().await?;
        let identity = session.user.clone();
        self.store_session(Some(session));
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    #[instrument(skip_all, fields(email = %request.credentials.email))]
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AdapterError> {
        let response = self
            .http
            .post(self.url("auth/v1/signup")?)
            .header(AUTHORIZATION, self.bearer())
            .json(&json!({
                "email": request.credentials.email,
                "password": request.credentials.password,
                "data": request.metadata,
            }))
            .send()
            .await?;

        let body: Value = check_auth(response).await?.json().await?;

        // Auto-confirmed projects answer with a full session, others with the bare user.
        if body.get("access_token").is_some() {
            let session: TokenSession = serde_json::from_value(body)
                .map_err(|err| AdapterError::Decode(err.to_string()))?;
            let identity = session.user.clone();
            self.store_session(Some(session));
            self.emit(AuthEvent::SignedIn(identity.clone()));
            return Ok(SignUpOutcome::signed_in(identity));
        }

        let user = body.get("user").cloned().unwrap_or(body);
        if user.get("id").is_none() {
            return Ok(SignUpOutcome::pending(None));
        }
        serde_json::from_value(user)
            .map(|identity| SignUpOutcome::pending(Some(identity)))
            .map_err(|err| AdapterError::Decode(err.to_string()))
    }

    #[instrument(skip_all)]
    async fn sign_out(&self) -> Result<(), AdapterError> {
        if self.has_session() {
            let response = self
                .http
                .post(self.url("auth/v1/logout")?)
                .header(AUTHORIZATION, self.bearer())
                .send()
                .await?;
            // An already expired token still means the session is gone.
            if response.status() != StatusCode::UNAUTHORIZED {
                check(response).await?;
            }
        }

        self.store_session(None);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    #[instrument(skip_all)]
    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AdapterError> {
        let mut url = self.url("auth/v1/recover")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&json!({ "email": email }))
            .send()
            .await?;
        check_auth(response).await?;
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    #[instrument(skip_all, fields(table = %query.table))]
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Record>, AdapterError> {
        let mut url = self.url(&format!("rest/v1/{}", query.table))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", &query.columns);
            for filter in &query.filters {
                pairs.append_pair(&filter.column, &eq_operand(filter));
            }
            if let Some(order) = &query.order {
                let direction = if order.ascending { "asc" } else { "desc" };
                pairs.append_pair("order", &format!("{}.{direction}", order.column));
            }
            if query.single {
                pairs.append_pair("limit", "1");
            }
        }

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let rows: Vec<Record> = check(response).await?.json().await?;
        if query.single && rows.is_empty() {
            return Err(AdapterError::NotFound {
                table: query.table.clone(),
            });
        }
        Ok(rows)
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert(&self, table: &str, row: Record) -> Result<Record, AdapterError> {
        let response = self
            .http
            .post(self.url(&format!("rest/v1/{table}"))?)
            .header(AUTHORIZATION, self.bearer())
            .header("Prefer", "return=representation")
            .json(&vec![row])
            .send()
            .await?;

        let mut rows: Vec<Record> = check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(AdapterError::Decode(format!(
                "insert into {table} returned no representation"
            )));
        }
        Ok(rows.swap_remove(0))
    }

    #[instrument(skip_all, fields(table = %table, column = %filter.column))]
    async fn update(&self, table: &str, changes: Record, filter: &Filter) -> Result<(), AdapterError> {
        let mut url = self.url(&format!("rest/v1/{table}"))?;
        url.query_pairs_mut()
            .append_pair(&filter.column, &eq_operand(filter));

        let response = self
            .http
            .patch(url)
            .header(AUTHORIZATION, self.bearer())
            .json(&changes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(bucket = %upload.bucket, path = %upload.path))]
    async fn upload_blob(&self, upload: BlobUpload) -> Result<String, AdapterError> {
        let url = self.url(&format!(
            "storage/v1/object/{}/{}",
            upload.bucket, upload.path
        ))?;
        let content_type = upload
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_owned());

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, format!("max-age={}", upload.cache_control))
            .header("x-upsert", upload.upsert.to_string())
            .body(upload.bytes)
            .send()
            .await?;

        let stored: StoredObject = check(response).await?.json().await?;
        Ok(stored
            .key
            .unwrap_or_else(|| format!("{}/{}", upload.bucket, upload.path)))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}storage/v1/object/public/{bucket}/{path}",
            self.base.as_str()
        )
    }
}

/// Builds [`RestBackend`] clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestFactory;

impl BackendFactory for RestFactory {
    fn create(&self, endpoint: &BackendEndpoint) -> Result<BackendHandle, AdapterError> {
        Ok(Arc::new(RestBackend::connect(endpoint)?))
    }
}

/// Considers the backend available once its auth health endpoint answers.
pub struct RestProbe {
    http: Client,
    health: Url,
    public_key: String,
}

impl RestProbe {
    pub fn new(endpoint: &BackendEndpoint) -> Result<Self, AdapterError> {
        let health = normalized_base(&endpoint.url)?
            .join("auth/v1/health")
            .map_err(|err| AdapterError::Construction(err.to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|err| AdapterError::Construction(err.to_string()))?;

        Ok(Self {
            http,
            health,
            public_key: endpoint.public_key.clone(),
        })
    }
}

#[async_trait]
impl FactoryProbe for RestProbe {
    async fn probe(&self) -> Option<Arc<dyn BackendFactory>> {
        match self
            .http
            .get(self.health.clone())
            .header("apikey", &self.public_key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Some(Arc::new(RestFactory)),
            Ok(response) => {
                debug!(status = %response.status(), "backend not ready");
                None
            }
            Err(err) => {
                debug!(error = %err, "backend unreachable");
                None
            }
        }
    }
}

fn normalized_base(url: &Url) -> Result<Url, AdapterError> {
    if url.cannot_be_a_base() {
        return Err(AdapterError::Construction(format!(
            "{url} cannot be used as a base URL"
        )));
    }
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn eq_operand(filter: &Filter) -> String {
    match &filter.value {
        Value::String(value) => format!("eq.{value}"),
        other => format!("eq.{other}"),
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ServiceErrorBody>().await {
        Ok(ServiceErrorBody {
            message: Some(message),
        }) => message,
        _ => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned(),
    }
}

async fn check(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(AdapterError::Status {
        status: status.as_u16(),
        message: error_message(response).await,
    })
}

/// Like [`check`], but client errors on auth endpoints are credential problems.
async fn check_auth(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_client_error() {
        return Err(AdapterError::Auth {
            message: error_message(response).await,
        });
    }
    check(response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn endpoint(url: &str, key: &str) -> BackendEndpoint {
        BackendEndpoint::new(Url::parse(url).expect("url"), key)
    }

    #[rstest]
    #[case("https://example.supabase.co", "https://example.supabase.co/")]
    #[case("https://example.supabase.co/base", "https://example.supabase.co/base/")]
    fn base_gains_trailing_slash(#[case] input: &str, #[case] expected: &str) {
        let base = normalized_base(&Url::parse(input).expect("url")).expect("base");
        assert_eq!(base.as_str(), expected);
    }

    #[test]
    fn construction_rejects_invalid_key() {
        let err = RestBackend::connect(&endpoint("https://example.supabase.co", "bad\nkey"))
            .err()
            .expect("construction should fail");
        assert!(matches!(err, AdapterError::Construction(_)));
    }

    #[test]
    fn public_url_points_at_public_bucket() {
        let backend =
            RestBackend::connect(&endpoint("https://example.supabase.co", "anon")).expect("client");
        assert_eq!(
            backend.public_url("school_badges", "u1/badge_1.png"),
            "https://example.supabase.co/storage/v1/object/public/school_badges/u1/badge_1.png"
        );
    }

    #[rstest]
    #[case(json!("u1"), "eq.u1")]
    #[case(json!(42), "eq.42")]
    fn eq_operand_formats_values(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(eq_operand(&Filter::eq("user_id", value)), expected);
    }

    #[tokio::test]
    async fn signed_out_client_has_no_identity() {
        let backend =
            RestBackend::connect(&endpoint("https://example.supabase.co", "anon")).expect("client");
        let identity = backend.current_identity().await.expect("no request is made");
        assert!(identity.is_none());
    }
}
