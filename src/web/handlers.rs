//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Target, DEFAULT_CHECK_INTERVAL, MAX_CHECK_INTERVAL};
use crate::status;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const MAX_REPORT_DAYS: i64 = 365;

// ============================================================================
// Auth
// ============================================================================

/// Check the shared secret from `Authorization: Bearer` or `x-cron-secret`.
/// Without a configured secret nothing is authorized.
pub fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let cron = headers.get("x-cron-secret").and_then(|v| v.to_str().ok());

    bearer.or(cron).is_some_and(|given| constant_time_eq(given.as_bytes(), secret.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        e => {
            tracing::error!("Request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_health() -> impl IntoResponse {
    "ok"
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match status::list_targets_with_status(&state.store, Utc::now()) {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match status::get_target_detail(&state.store, id, Utc::now()) {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub check_interval: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl TargetRequest {
    fn into_target(self, id: i64) -> Result<Target, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("name is required".to_string());
        }
        validate_url(&self.url)?;

        let check_interval = validate_check_interval(self.check_interval)?;

        Ok(Target {
            id,
            name,
            url: self.url,
            check_interval,
            is_active: self.is_active.unwrap_or(true),
        })
    }
}

/// Seconds between checks, defaulted when absent. Must be positive and at
/// most [`MAX_CHECK_INTERVAL`].
pub fn validate_check_interval(secs: Option<i64>) -> Result<i64, String> {
    let secs = secs.unwrap_or(DEFAULT_CHECK_INTERVAL);
    if secs <= 0 {
        return Err("check_interval must be positive".to_string());
    }
    if secs > MAX_CHECK_INTERVAL {
        return Err(format!("check_interval must be at most {} seconds", MAX_CHECK_INTERVAL));
    }
    Ok(secs)
}

/// Only absolute http(s) URLs can be probed.
pub fn validate_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid url: {}", e))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err("url has no host".to_string()),
        other => Err(format!("unsupported url scheme: {}", other)),
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    if !authorized(&headers, state.config.cron_secret.as_deref()) {
        return unauthorized();
    }

    let mut target = match req.into_target(0) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.store.add_target(&mut target) {
        Ok(_) => {
            tracing::info!("Added target {} ({})", target.name, target.url);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    if !authorized(&headers, state.config.cron_secret.as_deref()) {
        return unauthorized();
    }

    let target = match req.into_target(id) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.store.update_target(&target) {
        Ok(_) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if !authorized(&headers, state.config.cron_secret.as_deref()) {
        return unauthorized();
    }

    match state.store.delete_target(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Incidents
// ============================================================================

pub async fn handle_active_incidents(State(state): State<AppState>) -> impl IntoResponse {
    match status::get_active_incidents_summary(&state.store) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Cycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CycleQuery {
    #[serde(default)]
    pub force: Option<bool>,
}

pub async fn handle_trigger_cycle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CycleQuery>,
) -> impl IntoResponse {
    if !authorized(&headers, state.config.cron_secret.as_deref()) {
        return unauthorized();
    }

    match state.scheduler.run_cycle(query.force.unwrap_or(false)).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!("Manual cycle failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Reports
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn handle_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> impl IntoResponse {
    if !authorized(&headers, state.config.cron_secret.as_deref()) {
        return unauthorized();
    }

    let days = query.days.unwrap_or(30).clamp(1, MAX_REPORT_DAYS);
    let report = match status::report(&state.store, days, Utc::now()) {
        Ok(r) => r,
        Err(e) => return db_error(e),
    };

    match query.format.as_deref().unwrap_or("json") {
        "json" => Json(report).into_response(),
        "csv" => (
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            status::report_csv(&report),
        )
            .into_response(),
        other => {
            (StatusCode::BAD_REQUEST, format!("unsupported format: {}", other)).into_response()
        }
    }
}

// ============================================================================
// API: User reports
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DownReport {
    pub target_id: i64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownNotification {
    target_id: i64,
    target: String,
    url: String,
    message: Option<String>,
    reported_at: chrono::DateTime<Utc>,
}

/// Record a user's "this looks down" report. Never touches incidents.
pub async fn handle_report_down(
    State(state): State<AppState>,
    Json(report): Json<DownReport>,
) -> impl IntoResponse {
    let target = match state.store.get_target(report.target_id) {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };

    let message = report
        .message
        .map(|m| m.chars().take(1000).collect::<String>())
        .filter(|m| !m.trim().is_empty());
    tracing::warn!(target_id = target.id, "User reported {} as down: {:?}", target.name, message);

    if let Some(webhook) = state.config.notify_webhook.clone() {
        let notification = DownNotification {
            target_id: target.id,
            target: target.name,
            url: target.url,
            message,
            reported_at: Utc::now(),
        };
        let client = state.http.clone();
        tokio::spawn(async move {
            let sent = client.post(&webhook).json(&notification).send().await;
            match sent.and_then(|r| r.error_for_status()) {
                Ok(_) => tracing::debug!("Forwarded down report to webhook"),
                Err(e) => tracing::warn!("Failed to forward down report: {}", e),
            }
        });
    }

    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProbeSettings, ServerConfig};
    use crate::db::Store;
    use crate::probe::HttpProber;
    use crate::scheduler::Scheduler;
    use crate::web::Server;
    use axum::http::HeaderValue;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn test_authorized() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers, Some("s3cret")));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorized(&headers, Some("s3cret")));
        assert!(!authorized(&headers, Some("other")));
        assert!(!authorized(&headers, None));

        let mut cron = HeaderMap::new();
        cron.insert("x-cron-secret", HeaderValue::from_static("s3cret"));
        assert!(authorized(&cron, Some("s3cret")));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/health").is_ok());
        assert!(validate_url("http://10.0.0.1:8080").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("example.com").is_err());
    }

    #[test]
    fn test_check_interval_bounds() {
        assert_eq!(validate_check_interval(None), Ok(DEFAULT_CHECK_INTERVAL));
        assert_eq!(validate_check_interval(Some(60)), Ok(60));
        assert_eq!(validate_check_interval(Some(MAX_CHECK_INTERVAL)), Ok(MAX_CHECK_INTERVAL));
        assert!(validate_check_interval(Some(0)).is_err());
        assert!(validate_check_interval(Some(MAX_CHECK_INTERVAL + 1)).is_err());

        let huge = TargetRequest {
            name: "svc".to_string(),
            url: "https://svc.example.com".to_string(),
            check_interval: Some(10_000_000_000_000),
            is_active: None,
        };
        assert!(huge.into_target(0).is_err());
    }

    async fn spawn_app(tmp: &NamedTempFile) -> (String, Arc<Store>) {
        let config = ServerConfig {
            cron_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(HttpProber::new(&ProbeSettings::default()).unwrap());
        let scheduler = Arc::new(Scheduler::new(store.clone(), prober, 5, 30));
        let router = Server::new(config, store.clone(), scheduler).routes();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), store)
    }

    #[tokio::test]
    async fn test_cycle_requires_secret() {
        let tmp = NamedTempFile::new().unwrap();
        let (base, _store) = spawn_app(&tmp).await;
        let client = reqwest::Client::new();

        let denied = client.post(format!("{}/api/cycle?force=true", base)).send().await.unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let wrong = client
            .post(format!("{}/api/cycle", base))
            .bearer_auth("nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

        let ok = client
            .post(format!("{}/api/cycle", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = ok.json().await.unwrap();
        assert_eq!(body["checked"], 0);
    }

    #[tokio::test]
    async fn test_target_endpoints() {
        let tmp = NamedTempFile::new().unwrap();
        let (base, _store) = spawn_app(&tmp).await;
        let client = reqwest::Client::new();

        let created = client
            .post(format!("{}/api/targets", base))
            .header("x-cron-secret", "s3cret")
            .json(&serde_json::json!({"name": "Docs", "url": "https://docs.example.com"}))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), reqwest::StatusCode::CREATED);
        let created: serde_json::Value = created.json().await.unwrap();
        assert_eq!(created["check_interval"], 420);
        let id = created["id"].as_i64().unwrap();

        let too_long = client
            .put(format!("{}/api/targets/{}", base, id))
            .header("x-cron-secret", "s3cret")
            .json(&serde_json::json!({
                "name": "Docs",
                "url": "https://docs.example.com",
                "check_interval": 10_000_000_000_000i64
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(too_long.status(), reqwest::StatusCode::BAD_REQUEST);

        let list: serde_json::Value = client
            .get(format!("{}/api/targets", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list[0]["name"], "Docs");
        assert_eq!(list[0]["current_status"], "unknown");
        assert_eq!(list[0]["active_incident_count"], 0);

        let detail = client.get(format!("{}/api/targets/{}", base, id)).send().await.unwrap();
        assert_eq!(detail.status(), reqwest::StatusCode::OK);
        let missing = client.get(format!("{}/api/targets/9999", base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let report = client
            .post(format!("{}/api/report-down", base))
            .json(&serde_json::json!({"target_id": id, "message": "cannot load"}))
            .send()
            .await
            .unwrap();
        assert_eq!(report.status(), reqwest::StatusCode::ACCEPTED);

        let summary: serde_json::Value = client
            .get(format!("{}/api/incidents/active", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["active_count"], 0);
    }

    #[tokio::test]
    async fn test_report_formats() {
        let tmp = NamedTempFile::new().unwrap();
        let (base, _store) = spawn_app(&tmp).await;
        let client = reqwest::Client::new();

        let denied = client.get(format!("{}/api/report", base)).send().await.unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let csv = client
            .get(format!("{}/api/report?days=7&format=csv", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(csv.status(), reqwest::StatusCode::OK);
        assert!(csv.text().await.unwrap().starts_with("target_id,target_name"));

        let bad = client
            .get(format!("{}/api/report?format=pdf", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
