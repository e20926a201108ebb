//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default seconds between checks of a target.
pub const DEFAULT_CHECK_INTERVAL: i64 = 420;

/// Longest accepted check interval (one year).
pub const MAX_CHECK_INTERVAL: i64 = 365 * 24 * 60 * 60;

/// Interval actually stored: non-positive means default, and anything past
/// [`MAX_CHECK_INTERVAL`] is capped.
pub fn normalize_check_interval(secs: i64) -> i64 {
    if secs <= 0 {
        DEFAULT_CHECK_INTERVAL
    } else {
        secs.min(MAX_CHECK_INTERVAL)
    }
}

/// A monitored service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Seconds between checks.
    pub check_interval: i64,
    pub is_active: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            is_active: true,
        }
    }
}

/// Health level assigned to a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Operational,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Operational => "operational",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "operational" => Some(HealthStatus::Operational),
            "degraded" => Some(HealthStatus::Degraded),
            "down" => Some(HealthStatus::Down),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probe outcome, appended to the history log.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub target_id: i64,
    pub status: HealthStatus,
    pub response_time_ms: Option<i64>,
    pub status_code: Option<i64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "investigating" => Some(IncidentStatus::Investigating),
            "identified" => Some(IncidentStatus::Identified),
            "monitoring" => Some(IncidentStatus::Monitoring),
            "resolved" => Some(IncidentStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minor" => Some(Severity::Minor),
            "major" => Some(Severity::Major),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub target_id: i64,
    pub title: String,
    pub description: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Timeline entry attached to an incident.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentUpdate {
    pub id: i64,
    pub incident_id: i64,
    pub message: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
}

/// The "why is this down" text shown while an incident is open.
#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementReason {
    pub target_id: i64,
    pub incident_id: i64,
    pub reason_code: String,
    pub reason_text: String,
}

/// A candidate outage explanation with a relative selection weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonTemplate {
    pub code: String,
    pub text: String,
    pub weight: u32,
}

/// Fields needed to open an incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub target_id: i64,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub started_at: DateTime<Utc>,
}

/// What a conditional incident open did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(i64),
    /// The target already has an active incident.
    AlreadyOpen,
    /// An incident of the target was resolved after the failing check ran.
    Superseded,
}

impl OpenOutcome {
    #[cfg(test)]
    pub fn incident_id(self) -> Option<i64> {
        match self {
            OpenOutcome::Opened(id) => Some(id),
            _ => None,
        }
    }
}

/// A target with its last check time, used for due selection.
#[derive(Debug, Clone)]
pub struct TargetSchedule {
    pub target: Target,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Current state of a target for the dashboard listing.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    #[serde(flatten)]
    pub target: Target,
    /// Status of the latest probe, or "unknown".
    pub current_status: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<i64>,
    pub uptime_percentage_30d: Option<f64>,
    pub active_incident_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentWithUpdates {
    #[serde(flatten)]
    pub incident: Incident,
    pub updates: Vec<IncidentUpdate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetDetail {
    pub target: Target,
    pub history: Vec<ProbeResult>,
    pub incidents: Vec<IncidentWithUpdates>,
    /// Reasons shown for the target's open incidents.
    pub announcements: Vec<AnnouncementReason>,
}

/// Active incident joined with its target and persisted reason (if any).
#[derive(Debug, Clone)]
pub struct ActiveIncidentRow {
    pub incident_id: i64,
    pub target_id: i64,
    pub target_name: String,
    pub started_at: DateTime<Utc>,
    pub reason_text: Option<String>,
}

/// Per-target rollup over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target_id: i64,
    pub target_name: String,
    pub total_checks: i64,
    pub up_checks: i64,
    pub uptime_percentage: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub incident_count: i64,
    /// Mean time to recovery over incidents resolved in range, in minutes.
    pub mttr_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for s in [HealthStatus::Operational, HealthStatus::Degraded, HealthStatus::Down] {
            assert_eq!(HealthStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(HealthStatus::parse("unknown"), None);
        assert_eq!(IncidentStatus::parse("resolved"), Some(IncidentStatus::Resolved));
        assert_eq!(Severity::parse("major"), Some(Severity::Major));
    }

    #[test]
    fn test_target_defaults() {
        let t = Target::default();
        assert_eq!(t.check_interval, 420);
        assert!(t.is_active);
    }

    #[test]
    fn test_normalize_check_interval() {
        assert_eq!(normalize_check_interval(0), DEFAULT_CHECK_INTERVAL);
        assert_eq!(normalize_check_interval(-5), DEFAULT_CHECK_INTERVAL);
        assert_eq!(normalize_check_interval(60), 60);
        assert_eq!(normalize_check_interval(MAX_CHECK_INTERVAL), MAX_CHECK_INTERVAL);
        assert_eq!(normalize_check_interval(10_000_000_000_000), MAX_CHECK_INTERVAL);
    }
}
