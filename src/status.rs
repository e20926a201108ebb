//! Read-only views over targets, history and incidents.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt::Write as _;

use crate::db::{DbError, Store, TargetDetail, TargetReport, TargetStatus};
use crate::incident::fallback_reason;

/// Days of history behind status listings and detail pages.
pub const HISTORY_DAYS: i64 = 30;
const DETAIL_INCIDENT_LIMIT: i64 = 10;

pub fn list_targets_with_status(
    store: &Store,
    now: DateTime<Utc>,
) -> Result<Vec<TargetStatus>, DbError> {
    store.get_target_statuses(now - ChronoDuration::days(HISTORY_DAYS))
}

pub fn get_target_detail(
    store: &Store,
    id: i64,
    now: DateTime<Utc>,
) -> Result<TargetDetail, DbError> {
    let target = store.get_target(id)?;
    let history = store.get_probe_results(id, now - ChronoDuration::days(HISTORY_DAYS))?;
    let incidents = store.get_recent_incidents(id, DETAIL_INCIDENT_LIMIT)?;
    let announcements = store.get_reasons_for_target(id)?;
    Ok(TargetDetail {
        target,
        history,
        incidents,
        announcements,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReason {
    pub target: String,
    pub reason_text: String,
}

/// Data behind the "we are having problems" banner.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveIncidentsSummary {
    pub active_count: usize,
    pub latest_started_at: Option<DateTime<Utc>>,
    pub affected_target_names: Vec<String>,
    pub reasons: Vec<TargetReason>,
}

pub fn get_active_incidents_summary(store: &Store) -> Result<ActiveIncidentsSummary, DbError> {
    let rows = store.get_active_incident_rows()?;

    let mut affected_target_names: Vec<String> = Vec::new();
    let mut reasons = Vec::with_capacity(rows.len());
    for row in &rows {
        if !affected_target_names.contains(&row.target_name) {
            affected_target_names.push(row.target_name.clone());
        }
        let reason_text = match &row.reason_text {
            Some(text) => text.clone(),
            None => fallback_reason(&row.target_name).to_string(),
        };
        reasons.push(TargetReason {
            target: row.target_name.clone(),
            reason_text,
        });
    }

    Ok(ActiveIncidentsSummary {
        active_count: rows.len(),
        latest_started_at: rows.iter().map(|r| r.started_at).max(),
        affected_target_names,
        reasons,
    })
}

/// Uptime and incident rollup over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub range_days: i64,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
}

pub fn report(store: &Store, range_days: i64, now: DateTime<Utc>) -> Result<Report, DbError> {
    let since = now - ChronoDuration::days(range_days);
    let mut targets = Vec::new();

    for target in store.get_targets()? {
        let (total_checks, up_checks, avg) = store.get_check_stats(target.id, since, now)?;
        let incidents = store.get_incidents_since(target.id, since)?;

        let recoveries: Vec<f64> = incidents
            .iter()
            .filter_map(|i| i.resolved_at.map(|r| (r - i.started_at).num_seconds() as f64 / 60.0))
            .collect();
        let mttr_minutes = if recoveries.is_empty() {
            None
        } else {
            Some(round2(recoveries.iter().sum::<f64>() / recoveries.len() as f64))
        };

        targets.push(TargetReport {
            target_id: target.id,
            target_name: target.name,
            total_checks,
            up_checks,
            uptime_percentage: crate::db::uptime_percentage(up_checks, total_checks),
            avg_response_time_ms: avg.map(round2),
            incident_count: incidents.len() as i64,
            mttr_minutes,
        });
    }

    Ok(Report {
        range_days,
        since,
        until: now,
        targets,
    })
}

/// Render a report as CSV, one row per target.
pub fn report_csv(report: &Report) -> String {
    let mut out = String::from(concat!(
        "target_id,target_name,total_checks,up_checks,uptime_percentage,",
        "avg_response_time_ms,incident_count,mttr_minutes\n"
    ));
    for t in &report.targets {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            t.target_id,
            csv_field(&t.target_name),
            t.total_checks,
            t.up_checks,
            opt(t.uptime_percentage),
            opt(t.avg_response_time_ms),
            t.incident_count,
            opt(t.mttr_minutes),
        );
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
