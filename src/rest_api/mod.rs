//! Operational HTTP API
//!
//! Serves the controller's health and Prometheus metrics.

mod handlers;
mod server;

pub use handlers::HealthResponse;
pub use server::run_server;
