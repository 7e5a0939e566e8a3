//! Module for the profile viewer API.

pub mod handlers;
pub mod routes;
