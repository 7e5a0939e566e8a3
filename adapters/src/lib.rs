//! Core `adapters` crate for abstracting the hosted identity and data backend.
//!
//! This crate defines the `BackendAdapter` trait, which outlines every capability
//! the portal needs from the external service (identity, records, blobs), the
//! `BackendFactory`/`FactoryProbe` pair used while waiting for the service to become
//! available, and the concrete implementations (REST, in-memory).

pub mod errors;
pub mod models;
pub mod rest;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use errors::AdapterError;
pub use models::*;

/// Capability interface over the external backend.
///
/// Implementations never panic on service failures; every failure is reported as
/// an [`AdapterError`] and it is the caller's decision whether it is fatal.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Returns the identity bound to the current token, or `None` when signed out.
    async fn current_identity(&self) -> Result<Option<Identity>, AdapterError>;

    /// Exchanges credentials for a session.
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AdapterError>;

    /// Creates an account. The service may return no identity when confirmation
    /// by email is pending.
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AdapterError>;

    /// Invalidates the current session.
    async fn sign_out(&self) -> Result<(), AdapterError>;

    /// Sends a password reset email that links back to `redirect_to`.
    async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AdapterError>;

    /// Subscribes to auth state changes pushed by the backend.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// Runs a filtered, ordered select against `query.table`.
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Record>, AdapterError>;

    /// Inserts a row and returns it as stored.
    async fn insert(&self, table: &str, row: Record) -> Result<Record, AdapterError>;

    /// Applies `changes` to every row matching the `eq` filter.
    async fn update(&self, table: &str, changes: Record, filter: &Filter) -> Result<(), AdapterError>;

    /// Stores a blob and returns its object path.
    async fn upload_blob(&self, upload: BlobUpload) -> Result<String, AdapterError>;

    /// Public URL of an uploaded object.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Shared handle to a constructed backend client.
pub type BackendHandle = Arc<dyn BackendAdapter>;

/// Builds backend clients once the service library is available.
pub trait BackendFactory: Send + Sync {
    /// Constructs a client bound to `endpoint`.
    fn create(&self, endpoint: &BackendEndpoint) -> Result<BackendHandle, AdapterError>;
}

/// Readiness check for the backend library.
#[async_trait]
pub trait FactoryProbe: Send + Sync {
    /// Returns the factory when it is available, `None` while it is still loading.
    async fn probe(&self) -> Option<Arc<dyn BackendFactory>>;
}
