//! Admin service over the `cell_records` measurement table: which devices
//! are currently connected, radio summaries for the dashboard, and the
//! device submission endpoint.

pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod reporter;
pub mod rest;
pub mod store;
pub mod validate;
