//! Incident lifecycle.
//!
//! Turns probe results into incident transitions. A target with no
//! unresolved incident is healthy; a `down` result opens one, an
//! `operational` result resolves all of them, and `degraded` changes
//! nothing.

mod reasons;

pub use reasons::*;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::db::{
    DbError, HealthStatus, NewIncident, OpenOutcome, ProbeResult, Severity, Store, Target,
};

pub const RESTORED_MESSAGE: &str = "Service has been restored and is operational";
const DEFAULT_DESCRIPTION: &str =
    "Automated monitoring detected that the service is not responding.";

/// What a reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Opened { incident_id: i64 },
    AlreadyOpen,
    Resolved { incident_ids: Vec<i64> },
    /// A `down` result older than the target's latest resolution.
    Superseded,
    Unchanged,
}

/// Applies probe results to the incident tables.
///
/// Check-then-write sequences are serialized per target with an in-process
/// lock; the store's transaction and unique index enforce the same rule
/// across processes.
pub struct Reconciler {
    store: Arc<Store>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    picker: RwLock<Option<Arc<ReasonPicker>>>,
}

impl Reconciler {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            picker: RwLock::new(None),
        }
    }

    /// Reload the reason template pool. Keeps the previous pool on failure.
    pub fn reload_reasons(&self) {
        match self.store.get_reason_templates() {
            Ok(templates) => {
                let picker = Arc::new(ReasonPicker::new(templates));
                if picker.is_empty() {
                    tracing::warn!(
                        "Reconciler: No weighted reason templates, using default reason"
                    );
                }
                if let Ok(mut slot) = self.picker.write() {
                    *slot = Some(picker);
                }
            }
            Err(e) => {
                tracing::warn!("Reconciler: Failed to load reason templates: {}", e);
            }
        }
    }

    /// Apply one probe result for `target`.
    pub async fn reconcile(
        &self,
        target: &Target,
        result: &ProbeResult,
    ) -> Result<Reconciliation, DbError> {
        match result.status {
            HealthStatus::Down => {
                let lock = self.target_lock(target.id)?;
                let _guard = lock.lock().await;
                self.open(target, result)
            }
            HealthStatus::Operational => {
                let lock = self.target_lock(target.id)?;
                let _guard = lock.lock().await;
                self.resolve(target, result)
            }
            HealthStatus::Degraded => Ok(Reconciliation::Unchanged),
        }
    }

    fn open(&self, target: &Target, result: &ProbeResult) -> Result<Reconciliation, DbError> {
        let (reason_code, reason_text) = self.choose_reason();
        let incident = NewIncident {
            target_id: target.id,
            title: format!("{} is down", target.name),
            description: result
                .error_message
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            severity: Severity::Major,
            started_at: result.checked_at,
        };

        match self.store.open_incident_if_none(&incident, &reason_code, &reason_text)? {
            OpenOutcome::Opened(incident_id) => {
                tracing::warn!(
                    target_id = target.id,
                    incident_id,
                    reason = %reason_code,
                    "Incident opened: {}",
                    incident.title
                );
                Ok(Reconciliation::Opened { incident_id })
            }
            OpenOutcome::AlreadyOpen => Ok(Reconciliation::AlreadyOpen),
            OpenOutcome::Superseded => Ok(Reconciliation::Superseded),
        }
    }

    fn resolve(&self, target: &Target, result: &ProbeResult) -> Result<Reconciliation, DbError> {
        let incident_ids = self.store.resolve_active_incidents(
            target.id,
            result.checked_at,
            Utc::now(),
            RESTORED_MESSAGE,
        )?;
        if incident_ids.is_empty() {
            return Ok(Reconciliation::Unchanged);
        }

        tracing::info!(
            target_id = target.id,
            count = incident_ids.len(),
            "Incidents resolved for {}",
            target.name
        );
        Ok(Reconciliation::Resolved { incident_ids })
    }

    fn choose_reason(&self) -> (String, String) {
        let cached = self.picker.read().ok().and_then(|p| p.clone());
        let picker = match cached {
            Some(p) => Some(p),
            None => {
                self.reload_reasons();
                self.picker.read().ok().and_then(|p| p.clone())
            }
        };

        let mut rng = rand::thread_rng();
        match picker.as_deref().and_then(|p| p.pick(&mut rng)) {
            Some(t) => (t.code.clone(), t.text.clone()),
            None => (DEFAULT_REASON_CODE.to_string(), DEFAULT_REASON_TEXT.to_string()),
        }
    }

    /// Clones are only handed out under the map lock, so an entry with no
    /// outside holder is idle and can be dropped.
    fn target_lock(&self, target_id: i64) -> Result<Arc<tokio::sync::Mutex<()>>, DbError> {
        let mut locks = self.locks.lock().map_err(|_| DbError::Poisoned)?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks.entry(target_id).or_default().clone())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
