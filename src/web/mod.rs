//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::probe::HttpProber;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler<HttpProber>>,
    /// Client for outbound notifications.
    pub http: reqwest::Client,
}

/// Web server for PulseWatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<Scheduler<HttpProber>>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                http: reqwest::Client::new(),
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/healthz", get(handlers::handle_health))
            // Status reads
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/targets", post(handlers::handle_create_target))
            .route("/api/targets/{id}", get(handlers::handle_get_target))
            .route(
                "/api/targets/{id}",
                put(handlers::handle_update_target).delete(handlers::handle_delete_target),
            )
            .route("/api/incidents/active", get(handlers::handle_active_incidents))
            // Cycle trigger (cron services tend to use GET)
            .route(
                "/api/cycle",
                get(handlers::handle_trigger_cycle).post(handlers::handle_trigger_cycle),
            )
            .route("/api/report", get(handlers::handle_report))
            .route("/api/report-down", post(handlers::handle_report_down))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
