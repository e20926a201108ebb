//! Probe module for HTTP health checks.
//!
//! A probe issues one GET (falling back to a single HEAD on transport
//! failure) and classifies the outcome into a health status.

mod classify;
mod http;

pub use classify::*;
pub use http::*;

use std::future::Future;
use thiserror::Error;

use crate::db::HealthStatus;

/// Probe error types.
///
/// Transport failures are not errors; they classify as `down`. Only setting
/// up the prober itself can fail.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Classified outcome of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub response_time_ms: Option<i64>,
    pub status_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Something that can check a URL.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, url: &str) -> impl Future<Output = ProbeOutcome> + Send;
}
