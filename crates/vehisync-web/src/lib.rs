//! JSON control API for the sync engine.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;
use vehisync_sync::{EngineConfig, SettingsUpdate, SyncError, SyncService, Trigger};

pub const CRATE_NAME: &str = "vehisync-web";

#[derive(Clone)]
pub struct AppState {
    pub sync: SyncService,
}

impl AppState {
    pub fn new(sync: SyncService) -> Self {
        Self { sync }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IncrementalRequest {
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PushQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Accepted {
    run_id: Uuid,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sync/status", get(status_handler))
        .route("/api/sync/full", post(full_sync_handler))
        .route("/api/sync/incremental", post(incremental_sync_handler))
        .route("/api/sync/stop", post(stop_handler))
        .route("/api/sync/push", post(push_handler))
        .route("/api/sync/runs", get(runs_handler))
        .route("/api/sync/runs/{id}", get(run_detail_handler))
        .route("/api/webhooks/vehicles/{slug}", post(webhook_handler))
        .route("/api/settings", get(settings_handler).put(update_settings_handler))
        .with_state(state)
}

/// Build the engine from the environment, start the scheduler and serve.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let sync = vehisync_sync::build_service(&config).await?;
    let settings = sync.settings().await?;
    sync.configure_scheduler(&settings).await?;

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "serving sync API");
    axum::serve(listener, app(AppState::new(sync.clone())))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    sync.shutdown_scheduler().await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.sync.get_sync_status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn full_sync_handler(State(state): State<AppState>) -> Response {
    match state.sync.start_full_sync(Trigger::Manual).await {
        Ok(run_id) => accepted(run_id),
        Err(err) => sync_error(err),
    }
}

async fn incremental_sync_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        IncrementalRequest::default()
    } else {
        match serde_json::from_slice::<IncrementalRequest>(&body) {
            Ok(request) => request,
            Err(err) => return bad_request(format!("invalid request body: {err}")),
        }
    };
    match state
        .sync
        .start_incremental_sync(request.since, request.slug, Trigger::Manual)
        .await
    {
        Ok(run_id) => accepted(run_id),
        Err(err) => sync_error(err),
    }
}

async fn webhook_handler(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    match state
        .sync
        .start_incremental_sync(None, Some(slug), Trigger::Webhook)
        .await
    {
        Ok(run_id) => accepted(run_id),
        Err(err) => sync_error(err),
    }
}

async fn stop_handler(State(state): State<AppState>) -> Response {
    match state.sync.stop_active_sync().await {
        Ok(Some(run)) => Json(json!({ "stopped": true, "run": run })).into_response(),
        Ok(None) => Json(json!({ "stopped": false })).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn push_handler(State(state): State<AppState>, Query(query): Query<PushQuery>) -> Response {
    match state.sync.push_pending_vehicles(query.limit.unwrap_or(100)).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn runs_handler(State(state): State<AppState>, Query(query): Query<RunsQuery>) -> Response {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    match state.sync.recent_runs(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn run_detail_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.sync.get_run(id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("run {id} not found") })),
        )
            .into_response(),
        Err(err) => sync_error(err),
    }
}

async fn settings_handler(State(state): State<AppState>) -> Response {
    match state.sync.settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn update_settings_handler(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    match state.sync.update_settings(update).await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => sync_error(err),
    }
}

fn accepted(run_id: Uuid) -> Response {
    (StatusCode::ACCEPTED, Json(Accepted { run_id })).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn sync_error(err: SyncError) -> Response {
    let status = match &err {
        SyncError::AlreadyRunning => StatusCode::CONFLICT,
        SyncError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %err, "sync API request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value as JsonValue;
    use tower::ServiceExt;
    use vehisync_adapters::{MemoryVehicleSource, RawVehicle};
    use vehisync_storage::MemoryReferenceStore;
    use vehisync_sync::{SyncBackends, SyncOptions};

    fn sync_service(vehicle_count: usize, batch_pause: Duration) -> SyncService {
        let vehicles: Vec<RawVehicle> = (0..vehicle_count)
            .map(|i| json!({ "slug": format!("cotxe-{i}"), "preu": 1000 + i }).into())
            .collect();
        let source = Arc::new(MemoryVehicleSource::new(vehicles));
        let backends = SyncBackends::in_memory(source, MemoryReferenceStore::new());
        SyncService::new(
            backends,
            SyncOptions {
                batch_size: 1,
                batch_pause,
                ..Default::default()
            },
        )
    }

    async fn json_body(resp: Response) -> JsonValue {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post(uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_health_and_status() {
        let app = app(AppState::new(sync_service(1, Duration::ZERO)));
        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let status = app
            .oneshot(Request::builder().uri("/api/sync/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let body = json_body(status).await;
        assert_eq!(body["is_running"], false);
        assert_eq!(body["config"]["sync_interval_minutes"], 30);
    }

    #[tokio::test]
    async fn second_full_sync_is_rejected_with_conflict() {
        let app = app(AppState::new(sync_service(10, Duration::from_millis(50))));
        let first = app
            .clone()
            .oneshot(post("/api/sync/full", Body::empty()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert!(json_body(first).await["run_id"].is_string());

        let second = app
            .clone()
            .oneshot(post("/api/sync/full", Body::empty()))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let stop = app.oneshot(post("/api/sync/stop", Body::empty())).await.unwrap();
        assert_eq!(stop.status(), StatusCode::OK);
        let body = json_body(stop).await;
        assert_eq!(body["stopped"], true);
        assert_eq!(body["run"]["error_message"], "manually stopped");
    }

    #[tokio::test]
    async fn webhook_and_incremental_requests_are_accepted() {
        let app = app(AppState::new(sync_service(3, Duration::ZERO)));
        let webhook = app
            .clone()
            .oneshot(post("/api/webhooks/vehicles/cotxe-1", Body::empty()))
            .await
            .unwrap();
        assert_eq!(webhook.status(), StatusCode::ACCEPTED);

        let incremental = app
            .clone()
            .oneshot(post(
                "/api/sync/incremental",
                Body::from(r#"{"since":"2026-01-01T00:00:00Z"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(incremental.status(), StatusCode::ACCEPTED);

        let malformed = app
            .oneshot(post("/api/sync/incremental", Body::from("{nope")))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let app = app(AppState::new(sync_service(0, Duration::ZERO)));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sync/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_settings_update_is_a_bad_request() {
        let app = app(AppState::new(sync_service(0, Duration::ZERO)));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"sync_interval_minutes":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
