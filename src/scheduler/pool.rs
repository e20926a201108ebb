//! Bounded worker pool for running probes.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

use crate::db::{HealthStatus, ProbeResult, Target};
use crate::probe::{Probe, ProbeOutcome};

/// Fixed-width pool of probe workers.
///
/// Each worker claims the next unprobed target until the queue is drained.
/// Every check runs in its own task, so a check that panics yields a `down`
/// result for its target and the worker moves on.
pub struct WorkerPool<P> {
    prober: Arc<P>,
    size: usize,
}

impl<P: Probe> WorkerPool<P> {
    pub fn new(prober: Arc<P>, size: usize) -> Self {
        Self {
            prober,
            size: size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Probe every target. Results arrive in completion order.
    pub async fn run(&self, targets: Vec<Target>) -> Vec<(Target, ProbeResult)> {
        if targets.is_empty() {
            return Vec::new();
        }

        let queue = Arc::new(targets);
        let next = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::with_capacity(queue.len())));

        let mut workers = JoinSet::new();
        for _ in 0..self.size.min(queue.len()) {
            let queue = queue.clone();
            let next = next.clone();
            let results = results.clone();
            let prober = self.prober.clone();

            workers.spawn(async move {
                loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(target) = queue.get(idx) else {
                        break;
                    };

                    let checked_at = Utc::now();
                    let outcome = check_isolated(&prober, &target.url).await;
                    let result = ProbeResult {
                        target_id: target.id,
                        status: outcome.status,
                        response_time_ms: outcome.response_time_ms,
                        status_code: outcome.status_code,
                        error_message: outcome.error_message,
                        checked_at,
                    };

                    match results.lock() {
                        Ok(mut collected) => collected.push((target.clone(), result)),
                        Err(_) => tracing::error!(
                            "Result list poisoned, dropping result for {}",
                            target.name
                        ),
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Probe worker stopped early: {}", e);
            }
        }

        let collected = match results.lock() {
            Ok(mut collected) => std::mem::take(&mut *collected),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        collected
    }
}

/// Run one check on its own task. A panic or cancellation becomes `down`.
async fn check_isolated<P: Probe>(prober: &Arc<P>, url: &str) -> ProbeOutcome {
    let prober = prober.clone();
    let owned = url.to_string();
    match tokio::spawn(async move { prober.probe(&owned).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Check of {} failed: {}", url, e);
            ProbeOutcome {
                status: HealthStatus::Down,
                response_time_ms: None,
                status_code: None,
                error_message: Some(format!("Health check failed: {}", e)),
            }
        }
    }
}
