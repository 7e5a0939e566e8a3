//! Module for the school registration API.

pub mod handlers;
pub mod routes;
