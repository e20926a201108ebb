//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row,
    TransactionBehavior,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Targets ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        target.check_interval = normalize_check_interval(target.check_interval);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, check_interval, is_active) VALUES (?1, ?2, ?3, ?4)",
            params![target.name, target.url, target.check_interval, target.is_active],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let interval = normalize_check_interval(target.check_interval);

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET name=?1, url=?2, check_interval=?3, is_active=?4 WHERE id=?5",
            params![target.name, target.url, interval, target.is_active, target.id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets, active or not.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, check_interval, is_active FROM targets ORDER BY name, id",
        )?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, url, check_interval, is_active FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a target. Results, incidents and reasons cascade.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Active targets with the time of their most recent check, read in one query.
    pub fn get_target_schedules(&self) -> Result<Vec<TargetSchedule>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.url, t.check_interval, t.is_active, MAX(p.checked_at)
             FROM targets t
             LEFT JOIN probe_results p ON p.target_id = t.id
             WHERE t.is_active = 1
             GROUP BY t.id
             ORDER BY t.id",
        )?;
        let schedules = stmt
            .query_map([], |row| {
                Ok(TargetSchedule {
                    target: target_from_row(row)?,
                    last_checked: opt_time_col(row, 5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(schedules)
    }

    // --- Probe history ---

    /// Add probe results in one batch transaction.
    pub fn add_probe_results(&self, results: &[ProbeResult]) -> Result<(), DbError> {
        if results.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO probe_results
                     (target_id, status, response_time_ms, status_code, error_message, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for r in results {
                stmt.execute(params![
                    r.target_id,
                    r.status.as_str(),
                    r.response_time_ms,
                    r.status_code,
                    r.error_message,
                    fmt_db_time(r.checked_at),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Get probe results for a target checked at or after `since`, oldest first.
    pub fn get_probe_results(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProbeResult>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, status, response_time_ms, status_code, error_message, checked_at
             FROM probe_results
             WHERE target_id = ?1 AND checked_at >= ?2
             ORDER BY checked_at ASC, id ASC",
        )?;
        let results = stmt
            .query_map(params![target_id, fmt_db_time(since)], probe_result_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    /// Delete probe results checked before the cutoff. Returns rows removed.
    pub fn delete_probe_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM probe_results WHERE checked_at < ?1",
            params![fmt_db_time(cutoff)],
        )?;
        Ok(deleted)
    }

    // --- Incidents ---

    /// Open an incident and its announcement reason unless the target already
    /// has an active incident.
    ///
    /// A failing check that ran before the target's latest resolution is
    /// `Superseded` and opens nothing. The checks and the insert run in one
    /// immediate transaction, and the partial unique index on active
    /// incidents rejects any insert that slips past them.
    pub fn open_incident_if_none(
        &self,
        incident: &NewIncident,
        reason_code: &str,
        reason_text: &str,
    ) -> Result<OpenOutcome, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM incidents WHERE target_id = ?1 AND status != 'resolved' LIMIT 1",
                params![incident.target_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let started_at = fmt_db_time(incident.started_at);
        let resolved_later: Option<i64> = tx
            .query_row(
                "SELECT id FROM incidents
                 WHERE target_id = ?1 AND status = 'resolved' AND resolved_at > ?2
                 LIMIT 1",
                params![incident.target_id, started_at],
                |row| row.get(0),
            )
            .optional()?;
        if resolved_later.is_some() {
            return Ok(OpenOutcome::Superseded);
        }

        let inserted = tx.execute(
            "INSERT INTO incidents (target_id, title, description, status, severity, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                incident.target_id,
                incident.title,
                incident.description,
                IncidentStatus::Investigating.as_str(),
                incident.severity.as_str(),
                started_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(OpenOutcome::AlreadyOpen),
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO announcement_reasons (incident_id, target_id, reason_code, reason_text)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, incident.target_id, reason_code, reason_text],
        )?;

        tx.commit()?;
        Ok(OpenOutcome::Opened(id))
    }

    /// Resolve the active incidents of a target that started at or before
    /// `observed_at`, in one transaction.
    ///
    /// Deletes their announcement reasons and records one timeline update per
    /// resolved incident. Returns the resolved incident IDs.
    pub fn resolve_active_incidents(
        &self,
        target_id: i64,
        observed_at: DateTime<Utc>,
        resolved_at: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<i64>, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ids = {
            let mut stmt = tx.prepare(
                "SELECT id FROM incidents
                 WHERE target_id = ?1 AND status != 'resolved' AND started_at <= ?2
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![target_id, fmt_db_time(observed_at)], |row| {
                    row.get::<_, i64>(0)
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            ids
        };
        if ids.is_empty() {
            return Ok(ids);
        }

        let now = fmt_db_time(resolved_at);
        {
            let mut resolve = tx.prepare(
                "UPDATE incidents SET status = ?1, resolved_at = ?2 WHERE id = ?3",
            )?;
            let mut clear_reason =
                tx.prepare("DELETE FROM announcement_reasons WHERE incident_id = ?1")?;
            let mut add_update = tx.prepare(
                "INSERT INTO incident_updates (incident_id, message, status, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for id in &ids {
                resolve.execute(params![IncidentStatus::Resolved.as_str(), now, id])?;
                clear_reason.execute(params![id])?;
                add_update.execute(params![id, message, IncidentStatus::Resolved.as_str(), now])?;
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Non-resolved incidents of a target.
    #[cfg(test)]
    pub fn get_active_incidents(&self, target_id: i64) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, title, description, status, severity, started_at, resolved_at
             FROM incidents WHERE target_id = ?1 AND status != 'resolved' ORDER BY id",
        )?;
        let incidents = stmt
            .query_map(params![target_id], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// Most recent incidents of a target with their timeline updates.
    pub fn get_recent_incidents(
        &self,
        target_id: i64,
        limit: i64,
    ) -> Result<Vec<IncidentWithUpdates>, DbError> {
        let conn = self.conn()?;
        let incidents = {
            let mut stmt = conn.prepare(
                "SELECT id, target_id, title, description, status, severity, started_at, resolved_at
                 FROM incidents WHERE target_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![target_id, limit], incident_from_row)?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        let mut stmt = conn.prepare(
            "SELECT id, incident_id, message, status, created_at
             FROM incident_updates WHERE incident_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut out = Vec::with_capacity(incidents.len());
        for incident in incidents {
            let updates = stmt
                .query_map(params![incident.id], |row| {
                    Ok(IncidentUpdate {
                        id: row.get(0)?,
                        incident_id: row.get(1)?,
                        message: row.get(2)?,
                        status: incident_status_col(row, 3)?,
                        created_at: time_col(row, 4)?,
                    })
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            out.push(IncidentWithUpdates { incident, updates });
        }
        Ok(out)
    }

    /// Incidents of a target that started at or after `since`.
    pub fn get_incidents_since(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, title, description, status, severity, started_at, resolved_at
             FROM incidents WHERE target_id = ?1 AND started_at >= ?2 ORDER BY started_at",
        )?;
        let incidents = stmt
            .query_map(params![target_id, fmt_db_time(since)], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// All active incidents with their target name and persisted reason.
    pub fn get_active_incident_rows(&self) -> Result<Vec<ActiveIncidentRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, i.target_id, t.name, i.started_at, r.reason_text
             FROM incidents i
             JOIN targets t ON t.id = i.target_id
             LEFT JOIN announcement_reasons r ON r.incident_id = i.id
             WHERE i.status != 'resolved'
             ORDER BY i.started_at DESC, i.id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActiveIncidentRow {
                    incident_id: row.get(0)?,
                    target_id: row.get(1)?,
                    target_name: row.get(2)?,
                    started_at: time_col(row, 3)?,
                    reason_text: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Announcement reasons currently stored for a target.
    pub fn get_reasons_for_target(
        &self,
        target_id: i64,
    ) -> Result<Vec<AnnouncementReason>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, incident_id, reason_code, reason_text
             FROM announcement_reasons WHERE target_id = ?1 ORDER BY incident_id",
        )?;
        let reasons = stmt
            .query_map(params![target_id], |row| {
                Ok(AnnouncementReason {
                    target_id: row.get(0)?,
                    incident_id: row.get(1)?,
                    reason_code: row.get(2)?,
                    reason_text: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(reasons)
    }

    /// Load the reason template pool.
    pub fn get_reason_templates(&self) -> Result<Vec<ReasonTemplate>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT code, text, weight FROM reason_templates ORDER BY code")?;
        let templates = stmt
            .query_map([], |row| {
                let weight: i64 = row.get(2)?;
                Ok(ReasonTemplate {
                    code: row.get(0)?,
                    text: row.get(1)?,
                    weight: weight.clamp(0, u32::MAX as i64) as u32,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(templates)
    }

    // --- Read models ---

    /// Active targets with their latest status, uptime since `window_start`
    /// and active incident count.
    pub fn get_target_statuses(
        &self,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<TargetStatus>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.url, t.check_interval, t.is_active,
                    latest.status, latest.checked_at, latest.response_time_ms,
                    (SELECT COUNT(*) FROM probe_results p
                      WHERE p.target_id = t.id AND p.checked_at >= ?1),
                    (SELECT COUNT(*) FROM probe_results p
                      WHERE p.target_id = t.id AND p.checked_at >= ?1 AND p.status != 'down'),
                    (SELECT COUNT(*) FROM incidents i
                      WHERE i.target_id = t.id AND i.status != 'resolved')
             FROM targets t
             LEFT JOIN probe_results latest ON latest.id = (
                 SELECT p.id FROM probe_results p WHERE p.target_id = t.id
                 ORDER BY p.checked_at DESC, p.id DESC LIMIT 1)
             WHERE t.is_active = 1
             ORDER BY t.name, t.id",
        )?;
        let statuses = stmt
            .query_map(params![fmt_db_time(window_start)], |row| {
                let status: Option<String> = row.get(5)?;
                let total: i64 = row.get(8)?;
                let up: i64 = row.get(9)?;
                Ok(TargetStatus {
                    target: target_from_row(row)?,
                    current_status: status.unwrap_or_else(|| "unknown".to_string()),
                    last_checked: opt_time_col(row, 6)?,
                    response_time_ms: row.get(7)?,
                    uptime_percentage_30d: uptime_percentage(up, total),
                    active_incident_count: row.get(10)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(statuses)
    }

    /// Check counts and average latency of a target over `[since, until)`.
    ///
    /// Returns `(total, up, avg_response_time_ms)`.
    pub fn get_check_stats(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<(i64, i64, Option<f64>), DbError> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status != 'down' THEN 1 ELSE 0 END), 0),
                    AVG(response_time_ms)
             FROM probe_results
             WHERE target_id = ?1 AND checked_at >= ?2 AND checked_at < ?3",
            params![target_id, fmt_db_time(since), fmt_db_time(until)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), DbError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

/// Share of up checks as a percentage, or `None` without data.
pub fn uptime_percentage(up: i64, total: i64) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    let pct = up as f64 * 100.0 / total as f64;
    Some((pct * 100.0).round() / 100.0)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        check_interval: row.get(3)?,
        is_active: row.get(4)?,
    })
}

fn probe_result_from_row(row: &Row<'_>) -> SqlResult<ProbeResult> {
    let status: String = row.get(1)?;
    let status = HealthStatus::parse(&status).ok_or_else(|| conversion_error(1, &status))?;
    Ok(ProbeResult {
        target_id: row.get(0)?,
        status,
        response_time_ms: row.get(2)?,
        status_code: row.get(3)?,
        error_message: row.get(4)?,
        checked_at: time_col(row, 5)?,
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let severity: String = row.get(5)?;
    Ok(Incident {
        id: row.get(0)?,
        target_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: incident_status_col(row, 4)?,
        severity: Severity::parse(&severity).ok_or_else(|| conversion_error(5, &severity))?,
        started_at: time_col(row, 6)?,
        resolved_at: opt_time_col(row, 7)?,
    })
}

fn incident_status_col(row: &Row<'_>, idx: usize) -> SqlResult<IncidentStatus> {
    let s: String = row.get(idx)?;
    IncidentStatus::parse(&s).ok_or_else(|| conversion_error(idx, &s))
}

fn time_col(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| conversion_error(idx, &s))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(s) => parse_db_time(&s).map(Some).ok_or_else(|| conversion_error(idx, &s)),
        None => Ok(None),
    }
}

fn conversion_error(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected column value: {}", value).into(),
    )
}

/// Format a timestamp the way it is stored (sorts lexicographically).
pub fn fmt_db_time(dt: DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn new_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add(store: &Store, name: &str) -> Target {
        let mut target = Target {
            name: name.to_string(),
            url: format!("https://{}.example.com", name),
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();
        target
    }

    fn result_at(target_id: i64, status: HealthStatus, at: DateTime<Utc>) -> ProbeResult {
        ProbeResult {
            target_id,
            status,
            response_time_ms: Some(120),
            status_code: Some(200),
            error_message: None,
            checked_at: at,
        }
    }

    fn new_incident(target_id: i64) -> NewIncident {
        NewIncident {
            target_id,
            title: "api is down".to_string(),
            description: "Connection refused".to_string(),
            severity: Severity::Major,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = new_store();

        let mut target = Target {
            name: "Test".to_string(),
            url: "https://example.com".to_string(),
            check_interval: 0,
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.check_interval, DEFAULT_CHECK_INTERVAL);

        let mut updated = fetched;
        updated.name = "Updated".to_string();
        updated.is_active = false;
        store.update_target(&updated).unwrap();

        let mut fetched2 = store.get_target(id).unwrap();
        assert_eq!(fetched2.name, "Updated");
        assert!(!fetched2.is_active);

        fetched2.check_interval = 10_000_000_000_000;
        store.update_target(&fetched2).unwrap();
        assert_eq!(store.get_target(id).unwrap().check_interval, MAX_CHECK_INTERVAL);

        store.delete_target(id).unwrap();
        assert!(matches!(store.get_target(id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_schedules_skip_inactive_and_report_last_check() {
        let (_tmp, store) = new_store();
        let a = add(&store, "a");
        let mut b = add(&store, "b");
        b.is_active = false;
        store.update_target(&b).unwrap();
        let c = add(&store, "c");

        let now = Utc::now();
        store
            .add_probe_results(&[
                result_at(a.id, HealthStatus::Operational, now - ChronoDuration::seconds(600)),
                result_at(a.id, HealthStatus::Operational, now - ChronoDuration::seconds(60)),
            ])
            .unwrap();

        let schedules = store.get_target_schedules().unwrap();
        assert_eq!(schedules.len(), 2);
        let sa = schedules.iter().find(|s| s.target.id == a.id).unwrap();
        let last = sa.last_checked.unwrap();
        assert!((last - (now - ChronoDuration::seconds(60))).num_milliseconds().abs() < 1);
        let sc = schedules.iter().find(|s| s.target.id == c.id).unwrap();
        assert!(sc.last_checked.is_none());
    }

    #[test]
    fn test_history_query_and_retention_boundary() {
        let (_tmp, store) = new_store();
        let t = add(&store, "hist");
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(30);

        store
            .add_probe_results(&[
                result_at(t.id, HealthStatus::Down, cutoff - ChronoDuration::seconds(1)),
                result_at(t.id, HealthStatus::Operational, cutoff + ChronoDuration::seconds(1)),
                result_at(t.id, HealthStatus::Degraded, now),
            ])
            .unwrap();

        tokio_test::assert_ok!(store.add_probe_results(&[]));
        let deleted = tokio_test::assert_ok!(store.delete_probe_results_before(cutoff));
        assert_eq!(deleted, 1);

        let remaining = store.get_probe_results(t.id, now - ChronoDuration::days(365)).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.checked_at >= cutoff));
        assert_eq!(remaining[0].status, HealthStatus::Operational);
        assert_eq!(remaining[1].status, HealthStatus::Degraded);
    }

    #[test]
    fn test_open_incident_only_once() {
        let (_tmp, store) = new_store();
        let t = add(&store, "api");

        let first = store
            .open_incident_if_none(&new_incident(t.id), "network", "Network issue")
            .unwrap();
        assert!(first.incident_id().is_some());
        let second = store
            .open_incident_if_none(&new_incident(t.id), "network", "Network issue")
            .unwrap();
        assert_eq!(second, OpenOutcome::AlreadyOpen);

        let active = store.get_active_incidents(t.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, IncidentStatus::Investigating);
        assert_eq!(active[0].severity, Severity::Major);
        assert_eq!(store.get_reasons_for_target(t.id).unwrap().len(), 1);
    }

    #[test]
    fn test_unique_index_rejects_second_active_incident() {
        let (_tmp, store) = new_store();
        let t = add(&store, "api");
        store.open_incident_if_none(&new_incident(t.id), "x", "y").unwrap();

        let sql = format!(
            "INSERT INTO incidents (target_id, title, description, status, severity, started_at)
             VALUES ({}, 't', 'd', 'identified', 'major', '2024-01-01 00:00:00')",
            t.id
        );
        let err = store.execute_raw(&sql).unwrap_err();
        assert!(matches!(err, DbError::Sqlite(ref e) if is_constraint_violation(e)));
    }

    #[test]
    fn test_resolve_clears_reasons_and_adds_updates() {
        let (_tmp, store) = new_store();
        let t = add(&store, "api");
        let id = store
            .open_incident_if_none(&new_incident(t.id), "network", "Network issue")
            .unwrap()
            .incident_id()
            .unwrap();

        let now = Utc::now();
        let resolved = store.resolve_active_incidents(t.id, now, now, "back").unwrap();
        assert_eq!(resolved, vec![id]);
        assert!(store.get_active_incidents(t.id).unwrap().is_empty());
        assert!(store.get_reasons_for_target(t.id).unwrap().is_empty());

        let recent = store.get_recent_incidents(t.id, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].incident.status, IncidentStatus::Resolved);
        assert!(recent[0].incident.resolved_at.is_some());
        assert_eq!(recent[0].updates.len(), 1);
        assert_eq!(recent[0].updates[0].message, "back");

        let now = Utc::now();
        assert!(store.resolve_active_incidents(t.id, now, now, "back").unwrap().is_empty());
    }

    #[test]
    fn test_open_after_later_resolution_is_superseded() {
        let (_tmp, store) = new_store();
        let t = add(&store, "api");
        let now = Utc::now();

        let mut failing = new_incident(t.id);
        failing.started_at = now - ChronoDuration::minutes(10);
        store.open_incident_if_none(&failing, "x", "y").unwrap();
        store
            .resolve_active_incidents(t.id, now - ChronoDuration::minutes(1), now, "back")
            .unwrap();

        // Failing check taken before the resolution landed.
        failing.started_at = now - ChronoDuration::seconds(30);
        let stale = store.open_incident_if_none(&failing, "x", "y").unwrap();
        assert_eq!(stale, OpenOutcome::Superseded);
        assert!(store.get_active_incidents(t.id).unwrap().is_empty());

        failing.started_at = now + ChronoDuration::seconds(1);
        let fresh = store.open_incident_if_none(&failing, "x", "y").unwrap();
        assert!(fresh.incident_id().is_some());
    }

    #[test]
    fn test_resolve_leaves_incidents_newer_than_observation() {
        let (_tmp, store) = new_store();
        let t = add(&store, "api");
        let now = Utc::now();
        store.open_incident_if_none(&new_incident(t.id), "x", "y").unwrap();

        let earlier = now - ChronoDuration::minutes(1);
        assert!(store.resolve_active_incidents(t.id, earlier, now, "back").unwrap().is_empty());
        assert_eq!(store.get_active_incidents(t.id).unwrap().len(), 1);
        assert_eq!(store.get_reasons_for_target(t.id).unwrap().len(), 1);
    }

    #[test]
    fn test_target_statuses() {
        let (_tmp, store) = new_store();
        let a = add(&store, "alpha");
        let b = add(&store, "beta");
        let now = Utc::now();

        store
            .add_probe_results(&[
                result_at(a.id, HealthStatus::Down, now - ChronoDuration::minutes(30)),
                result_at(a.id, HealthStatus::Operational, now - ChronoDuration::minutes(20)),
                result_at(a.id, HealthStatus::Degraded, now - ChronoDuration::minutes(10)),
                result_at(a.id, HealthStatus::Down, now),
            ])
            .unwrap();
        store.open_incident_if_none(&new_incident(a.id), "x", "y").unwrap();

        let statuses = store.get_target_statuses(now - ChronoDuration::days(30)).unwrap();
        assert_eq!(statuses.len(), 2);
        let sa = &statuses[0];
        assert_eq!(sa.target.id, a.id);
        assert_eq!(sa.current_status, "down");
        assert_eq!(sa.uptime_percentage_30d, Some(50.0));
        assert_eq!(sa.active_incident_count, 1);

        let sb = &statuses[1];
        assert_eq!(sb.target.id, b.id);
        assert_eq!(sb.current_status, "unknown");
        assert!(sb.last_checked.is_none());
        assert!(sb.uptime_percentage_30d.is_none());
    }

    #[test]
    fn test_default_reason_templates_seeded() {
        let (_tmp, store) = new_store();
        let templates = store.get_reason_templates().unwrap();
        assert!(!templates.is_empty());
        assert!(templates.iter().all(|t| t.weight > 0));
    }

    #[test]
    fn test_parse_db_time_round_trip() {
        let now = Utc::now();
        let parsed = parse_db_time(&fmt_db_time(now)).unwrap();
        assert_eq!(parsed.timestamp_nanos_opt(), now.timestamp_nanos_opt());
        assert!(parse_db_time("not a time").is_none());
    }

    #[test]
    fn test_uptime_percentage_rounding() {
        assert_eq!(uptime_percentage(0, 0), None);
        assert_eq!(uptime_percentage(2, 3), Some(66.67));
        assert_eq!(uptime_percentage(5, 5), Some(100.0));
    }
}
