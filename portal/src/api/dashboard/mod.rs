//! Module for the administrator dashboard API.
//!
//! Every route here sits behind `require_auth`.

pub mod handlers;
pub mod routes;
