//! PulseWatch - HTTP uptime monitoring with automatic incident tracking.

mod config;
mod db;
mod incident;
mod probe;
mod scheduler;
mod status;
mod web;

use config::ServerConfig;
use db::Store;
use probe::HttpProber;
use scheduler::{RetentionManager, Scheduler};
use web::Server;

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entry in the targets seed file.
#[derive(Debug, Deserialize)]
struct SeedTarget {
    name: String,
    url: String,
    #[serde(default)]
    check_interval: Option<i64>,
    #[serde(default)]
    is_active: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulsewatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PulseWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    if cfg.cron_secret.is_none() {
        tracing::warn!(
            "PULSEWATCH_CRON_SECRET is not set; manual triggers and reports are disabled"
        );
    }

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if let Some(path) = &cfg.targets_file {
        seed_targets(&store, path)?;
    }

    // Create scheduler
    let prober = Arc::new(HttpProber::new(&cfg.probe)?);
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        cfg.probe.pool_size,
        cfg.retention_days,
    ));

    let retention = RetentionManager::new(
        store.clone(),
        cfg.retention_days,
        Duration::from_secs(cfg.retention_sweep_secs),
    );
    retention.start();

    if cfg.cycle_interval_secs > 0 {
        tracing::info!("Running check cycles every {}s", cfg.cycle_interval_secs);
        scheduler.clone().spawn_periodic(Duration::from_secs(cfg.cycle_interval_secs));
    }

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    retention.stop().await;
    Ok(())
}

/// Load targets from a JSON file into an empty database.
fn seed_targets(
    store: &Store,
    path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !store.get_targets()?.is_empty() {
        return Ok(());
    }

    let raw = std::fs::read_to_string(path)?;
    let seeds: Vec<SeedTarget> = serde_json::from_str(&raw)?;

    for seed in seeds {
        let check_interval = match web::validate_url(&seed.url)
            .and_then(|_| web::validate_check_interval(seed.check_interval))
        {
            Ok(secs) => secs,
            Err(e) => {
                tracing::warn!("Skipping seed target {}: {}", seed.name, e);
                continue;
            }
        };
        let mut target = db::Target {
            name: seed.name,
            url: seed.url,
            check_interval,
            is_active: seed.is_active.unwrap_or(true),
            ..Default::default()
        };
        store.add_target(&mut target)?;
        tracing::info!("Seeded target {} ({})", target.name, target.url);
    }

    Ok(())
}
