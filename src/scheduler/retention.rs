//! Retention manager for cleaning up old probe history.

use crate::db::{DbError, Store};

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Delete probe results older than `window_days`. Returns rows removed.
pub fn sweep(store: &Store, window_days: i64) -> Result<usize, DbError> {
    let cutoff = Utc::now() - ChronoDuration::days(window_days);
    let deleted = store.delete_probe_results_before(cutoff)?;
    if deleted > 0 {
        tracing::info!(
            "Retention: Deleted {} probe results older than {} days",
            deleted,
            window_days
        );
    }
    Ok(deleted)
}

/// Standing sweep so the retention window holds even when cycles are rare.
pub struct RetentionManager {
    store: Arc<Store>,
    window_days: i64,
    period: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, window_days: i64, period: Duration) -> Self {
        Self {
            store,
            window_days,
            period,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let stop = self.stop.clone();
        let window_days = self.window_days;
        let period = self.period;

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = sweep(&store, window_days) {
                            tracing::error!("RetentionManager: Sweep failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}
