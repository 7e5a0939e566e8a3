//! Central module for organizing the application's main API endpoints.
//!
//! This module acts as a top-level container for the page-level API domains
//! (dashboard, registration, profile), excluding core authentication routes which
//! are handled separately.

pub mod dashboard;
pub mod profile;
pub mod registration;
