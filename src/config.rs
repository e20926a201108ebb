//! Configuration module for PulseWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// Shared secret for manual cycle triggers and reports. Unset rejects them.
    pub cron_secret: Option<String>,
    /// Optional JSON file used to seed targets into an empty database.
    pub targets_file: Option<String>,
    /// Optional webhook that receives user "down" reports.
    pub notify_webhook: Option<String>,
    /// Seconds between in-process cycle triggers; 0 disables the timer.
    pub cycle_interval_secs: u64,
    /// Seconds between standing retention sweeps.
    pub retention_sweep_secs: u64,
    /// Days of probe history to keep.
    pub retention_days: i64,
    pub probe: ProbeSettings,
}

/// Typed settings for the prober and the worker pool.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Number of concurrent probe workers (default: 5)
    pub pool_size: usize,
    pub get_timeout: Duration,
    pub head_timeout: Duration,
    /// 2xx responses slower than this are reported as degraded.
    pub slow_threshold_ms: u64,
    pub user_agent: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            get_timeout: Duration::from_secs(10),
            head_timeout: Duration::from_secs(5),
            slow_threshold_ms: 2500,
            user_agent: format!("PulseWatch/{} (uptime monitor)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            cron_secret: None,
            targets_file: None,
            notify_webhook: None,
            cycle_interval_secs: 60,
            retention_sweep_secs: 3600,
            retention_days: 30,
            probe: ProbeSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (all prefixed with `PULSEWATCH_`):
    /// - `HTTP_PORT`: HTTP port (default: 8080)
    /// - `DB_PATH`: Database file path (default: "pulsewatch.db")
    /// - `CRON_SECRET`: shared secret for `/api/cycle` and `/api/report`
    /// - `TARGETS_FILE`: JSON seed file for targets
    /// - `NOTIFY_WEBHOOK`: URL receiving user down reports
    /// - `CYCLE_INTERVAL_SECS`: in-process trigger period (default: 60, 0 = off)
    /// - `RETENTION_SWEEP_SECS`: retention sweep period (default: 3600)
    /// - `RETENTION_DAYS`: history window (default: 30)
    /// - `POOL_SIZE`: probe workers (default: 5)
    /// - `GET_TIMEOUT_SECS` / `HEAD_TIMEOUT_SECS`: probe timeouts (default: 10 / 5)
    /// - `SLOW_THRESHOLD_MS`: degraded latency threshold (default: 2500)
    /// - `USER_AGENT`: probe user agent
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(format!("PULSEWATCH_{}", key)).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        parse_into(&lookup, "HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("DB_PATH") {
            cfg.db_path = db_path;
        }
        cfg.cron_secret = lookup("CRON_SECRET").filter(|s| !s.is_empty());
        cfg.targets_file = lookup("TARGETS_FILE").filter(|s| !s.is_empty());
        cfg.notify_webhook = lookup("NOTIFY_WEBHOOK").filter(|s| !s.is_empty());
        parse_into(&lookup, "CYCLE_INTERVAL_SECS", &mut cfg.cycle_interval_secs);
        parse_into(&lookup, "RETENTION_SWEEP_SECS", &mut cfg.retention_sweep_secs);
        parse_into(&lookup, "RETENTION_DAYS", &mut cfg.retention_days);
        parse_into(&lookup, "POOL_SIZE", &mut cfg.probe.pool_size);
        parse_into(&lookup, "SLOW_THRESHOLD_MS", &mut cfg.probe.slow_threshold_ms);

        let mut secs = 0u64;
        if parse_into(&lookup, "GET_TIMEOUT_SECS", &mut secs) && secs > 0 {
            cfg.probe.get_timeout = Duration::from_secs(secs);
        }
        if parse_into(&lookup, "HEAD_TIMEOUT_SECS", &mut secs) && secs > 0 {
            cfg.probe.head_timeout = Duration::from_secs(secs);
        }
        if let Some(ua) = lookup("USER_AGENT").filter(|s| !s.is_empty()) {
            cfg.probe.user_agent = ua;
        }

        cfg.probe.pool_size = cfg.probe.pool_size.max(1);
        if cfg.retention_days <= 0 {
            cfg.retention_days = 30;
        }
        if cfg.retention_sweep_secs == 0 {
            cfg.retention_sweep_secs = 3600;
        }

        cfg
    }
}

/// Overwrite `slot` when `key` is present and parses. Returns whether it did.
fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T) -> bool
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).and_then(|v| v.trim().parse().ok()) {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "pulsewatch.db");
        assert_eq!(cfg.probe.pool_size, 5);
        assert_eq!(cfg.probe.get_timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe.head_timeout, Duration::from_secs(5));
        assert_eq!(cfg.retention_days, 30);
        assert!(cfg.cron_secret.is_none());
    }

    #[test]
    fn test_overrides_and_clamping() {
        let vars: HashMap<&str, &str> = [
            ("HTTP_PORT", "9090"),
            ("CRON_SECRET", "s3cret"),
            ("POOL_SIZE", "0"),
            ("GET_TIMEOUT_SECS", "3"),
            ("HEAD_TIMEOUT_SECS", "nope"),
            ("RETENTION_DAYS", "-4"),
        ]
        .into_iter()
        .collect();

        let cfg = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.probe.pool_size, 1);
        assert_eq!(cfg.probe.get_timeout, Duration::from_secs(3));
        assert_eq!(cfg.probe.head_timeout, Duration::from_secs(5));
        assert_eq!(cfg.retention_days, 30);
    }
}
