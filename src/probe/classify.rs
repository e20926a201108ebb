//! Mapping of raw HTTP outcomes to health states.

use super::ProbeOutcome;
use crate::db::HealthStatus;

/// Why a probe never got an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Dns,
    Refused,
    Other(String),
}

impl FailureKind {
    pub fn message(&self) -> String {
        match self {
            FailureKind::Timeout => "Request timed out".to_string(),
            FailureKind::Dns => "DNS resolution failed".to_string(),
            FailureKind::Refused => "Connection refused".to_string(),
            FailureKind::Other(detail) => detail.clone(),
        }
    }
}

/// Classify an HTTP status code and latency.
pub fn classify_response(
    status_code: u16,
    latency_ms: u64,
    slow_threshold_ms: u64,
) -> ProbeOutcome {
    let (status, message) = match status_code {
        200..=299 if latency_ms <= slow_threshold_ms => (HealthStatus::Operational, None),
        200..=299 => (HealthStatus::Degraded, Some("Slow response".to_string())),
        401 | 403 => (HealthStatus::Operational, None),
        429 => (HealthStatus::Degraded, Some("Rate limited (429)".to_string())),
        404 => (HealthStatus::Degraded, Some("Page not found (404)".to_string())),
        500..=599 => (HealthStatus::Down, Some(format!("Server error ({})", status_code))),
        400..=499 => (HealthStatus::Degraded, Some(format!("Client error ({})", status_code))),
        300..=399 => (HealthStatus::Operational, None),
        _ => (HealthStatus::Degraded, Some(format!("Unexpected status ({})", status_code))),
    };

    ProbeOutcome {
        status,
        response_time_ms: Some(latency_ms as i64),
        status_code: Some(status_code as i64),
        error_message: message,
    }
}

/// Classify a transport failure. Timeouts carry no response time.
pub fn classify_failure(kind: &FailureKind, elapsed_ms: u64) -> ProbeOutcome {
    let response_time_ms = match kind {
        FailureKind::Timeout => None,
        _ => Some(elapsed_ms as i64),
    };

    ProbeOutcome {
        status: HealthStatus::Down,
        response_time_ms,
        status_code: None,
        error_message: Some(kind.message()),
    }
}

/// Work out the failure kind from an error description chain.
pub fn failure_kind(is_timeout: bool, detail: &str) -> FailureKind {
    if is_timeout {
        return FailureKind::Timeout;
    }

    let lower = detail.to_lowercase();
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
        || lower.contains("no such host")
    {
        FailureKind::Dns
    } else if lower.contains("connection refused") {
        FailureKind::Refused
    } else if lower.contains("timed out") {
        FailureKind::Timeout
    } else {
        FailureKind::Other(detail.to_string())
    }
}
