//! Authentication module for the client session bootstrap and auth-state cache.
//!
//! This module provides backend handle acquisition, the session cache with its
//! persistence mirror and observers, and the HTTP surface the sign-in page and
//! navigation bar talk to.

pub mod acquisition;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod mirror;
pub mod models;
pub mod observers;
pub mod routes;
pub mod service;

// Re-exports for convenience
pub use acquisition::*;
pub use errors::*;
pub use middleware::*;
pub use mirror::*;
pub use models::*;
pub use observers::*;
pub use routes::*;
pub use service::*;
