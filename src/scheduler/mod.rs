//! Scheduler module for running check cycles.
//!
//! A cycle selects due targets, probes them through the worker pool,
//! reconciles incidents per target, appends the batch to history and
//! sweeps expired history.

mod pool;
mod retention;

pub use pool::*;
pub use retention::*;

use crate::db::{DbError, HealthStatus, Store, Target, TargetSchedule};
use crate::incident::{Reconciler, Reconciliation};
use crate::probe::Probe;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("failed to load targets: {0}")]
    LoadTargets(#[source] DbError),
    #[error("failed to store probe results: {0}")]
    AppendHistory(#[source] DbError),
}

/// Targets that should be probed now.
///
/// With `force`, every active target is due. Otherwise a target is due when
/// it was never checked or its last check is at least `check_interval`
/// seconds old.
pub fn due_targets(
    schedules: Vec<TargetSchedule>,
    now: DateTime<Utc>,
    force: bool,
) -> Vec<Target> {
    schedules
        .into_iter()
        .filter(|s| s.target.is_active)
        .filter(|s| force || is_due(s.last_checked, s.target.check_interval, now))
        .map(|s| s.target)
        .collect()
}

/// An interval reaching past the representable time range is never due.
pub fn is_due(
    last_checked: Option<DateTime<Utc>>,
    check_interval: i64,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_checked else {
        return true;
    };
    match ChronoDuration::try_seconds(check_interval).and_then(|d| now.checked_sub_signed(d)) {
        Some(threshold) => last <= threshold,
        None => false,
    }
}

/// One target's line in a cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct CycleEntry {
    pub target_id: i64,
    pub target: String,
    pub status: HealthStatus,
    pub response_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub results: Vec<CycleEntry>,
}

/// Orchestrates check cycles. Cycles may overlap; the reconciler keeps
/// incident state consistent.
pub struct Scheduler<P> {
    store: Arc<Store>,
    pool: WorkerPool<P>,
    reconciler: Reconciler,
    retention_days: i64,
}

impl<P: Probe> Scheduler<P> {
    pub fn new(store: Arc<Store>, prober: Arc<P>, pool_size: usize, retention_days: i64) -> Self {
        Self {
            reconciler: Reconciler::new(store.clone()),
            pool: WorkerPool::new(prober, pool_size),
            store,
            retention_days,
        }
    }

    /// Run one cycle to completion.
    pub async fn run_cycle(&self, force: bool) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let schedules = self
            .store
            .get_target_schedules()
            .map_err(CycleError::LoadTargets)?;
        let due = due_targets(schedules, Utc::now(), force);

        tracing::info!(
            "Cycle: {} targets due (force={}, workers={})",
            due.len(),
            force,
            self.pool.size()
        );
        if due.is_empty() {
            return Ok(CycleReport { checked: 0, results: Vec::new() });
        }

        self.reconciler.reload_reasons();
        let probed = self.pool.run(due).await;

        let mut entries = Vec::with_capacity(probed.len());
        let mut results = Vec::with_capacity(probed.len());
        for (target, result) in probed {
            let error = match self.reconciler.reconcile(&target, &result).await {
                Ok(Reconciliation::Opened { incident_id }) => {
                    tracing::debug!("Cycle: {} opened incident {}", target.name, incident_id);
                    None
                }
                Ok(Reconciliation::Resolved { incident_ids }) => {
                    tracing::debug!(
                        "Cycle: {} resolved {} incident(s)",
                        target.name,
                        incident_ids.len()
                    );
                    None
                }
                Ok(Reconciliation::Superseded) => {
                    tracing::debug!(
                        "Cycle: {} result from {} predates the last resolution, skipped",
                        target.name,
                        result.checked_at
                    );
                    None
                }
                Ok(Reconciliation::AlreadyOpen | Reconciliation::Unchanged) => None,
                Err(e) => {
                    tracing::error!(
                        "Cycle: Failed to reconcile incidents for {}: {}",
                        target.name,
                        e
                    );
                    Some(format!("incident reconciliation failed: {}", e))
                }
            };

            entries.push(CycleEntry {
                target_id: target.id,
                target: target.name,
                status: result.status,
                response_time: result.response_time_ms,
                error,
            });
            results.push(result);
        }

        self.store
            .add_probe_results(&results)
            .map_err(CycleError::AppendHistory)?;

        if let Err(e) = sweep(&self.store, self.retention_days) {
            tracing::error!("Cycle: Retention sweep failed: {}", e);
        }

        tracing::info!(
            "Cycle: Checked {} targets in {:.2}s",
            entries.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(CycleReport {
            checked: entries.len(),
            results: entries,
        })
    }

    /// Trigger a non-forced cycle every `period`.
    pub fn spawn_periodic(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = self.run_cycle(false).await {
                    tracing::error!("Scheduled cycle failed: {}", e);
                }
            }
        });
    }
}
