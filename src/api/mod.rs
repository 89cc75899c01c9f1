//! HTTP API Module
//!
//! Read-only status endpoints for operators and the `wolfcast status` command.

mod http;

pub use http::{HealthResponse, HttpServer};
