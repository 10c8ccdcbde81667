//! Axum HTTP API server.
//!
//! This crate provides:
//! - The background replacement endpoints (`/change_background` and the
//!   two legacy polling endpoints)
//! - Per-job status, download and cancellation
//! - Health and readiness probes, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
