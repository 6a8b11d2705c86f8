//! HTTP control plane
//!
//! A single axum router serving configuration CRUD, reload triggers, bundle
//! export/upload, read-only log browsing, and the derived data-flow view.
//! Every endpoint requires `Authorization: Bearer <token>`; the token is
//! generated into `<configDir>/auth_token.txt` on first start when the root
//! config does not provide one. Responses are JSON and gzip-compressed when
//! the client accepts it.

mod data_flow;
mod files;
mod logs;

use crate::config::{BundleMode, ConfigBundle, ConfigStore};
use crate::orchestrator::{Orchestrator, ReloadHandle};
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Name of the generated token file; never served and never exported.
pub const AUTH_TOKEN_FILE: &str = "auth_token.txt";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RwLock<ConfigStore>>,
    pub orchestrator: Arc<Mutex<Orchestrator>>,
    pub reload: ReloadHandle,
    pub auth_token: String,
    pub enable_file_ops: bool,
    pub config_dir: PathBuf,
}

/// Error envelope all handlers share.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Unauthorized => "unauthorized".to_string(),
            ApiError::Forbidden(message)
            | ApiError::NotFound(message)
            | ApiError::BadRequest(message) => message.clone(),
            ApiError::Internal(error) => {
                warn!(%error, "request failed");
                error.to_string()
            }
        };
        (self.status(), Json(json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal(error)
    }
}

impl From<crate::error::ConfigError> for ApiError {
    fn from(error: crate::error::ConfigError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

/// Use the configured token, fall back to `auth_token.txt`, or generate a
/// fresh one and persist it.
pub fn load_or_create_token(config_dir: &Path, configured: Option<&str>) -> Result<String> {
    if let Some(token) = configured {
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }
    let path = config_dir.join(AUTH_TOKEN_FILE);
    if path.exists() {
        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }
    let token = uuid::Uuid::new_v4().simple().to_string();
    std::fs::write(&path, &token)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "generated API auth token");
    Ok(token)
}

async fn auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.auth_token);
    if !authorized {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Build the full API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/config/reload", post(reload_now))
        .route("/api/config/export", get(export_bundle))
        .route("/api/config/upload", post(upload_bundle))
        .route("/api/config/files", get(files::list_files))
        .route(
            "/api/config/file/{category}/{name}",
            get(files::get_file)
                .post(files::save_file)
                .put(files::save_file)
                .delete(files::delete_file),
        )
        .route("/api/logs/targets", get(logs::targets))
        .route("/api/logs/messages", get(logs::messages))
        .route("/api/logs/discover", get(logs::discover))
        .route("/api/logs/read", get(logs::read_file))
        .route("/api/logs/tail", get(logs::tail_file))
        .route("/api/data-flow", get(data_flow::data_flow))
        .layer(middleware::from_fn_with_state(state.clone(), auth))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(state: ApiState, host: &str, port: u16) -> Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", addr))?;
    info!(addr = %addr, "control plane listening");
    axum::serve(listener, app).await.context("API server failed")
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "timestamp": Utc::now().to_rfc3339()}))
}

async fn status(State(state): State<ApiState>) -> Json<Value> {
    let status = state.orchestrator.lock().await.status().await;
    Json(status)
}

async fn get_config(State(state): State<ApiState>) -> Json<Value> {
    Json(state.store.read().await.root_value())
}

async fn put_config(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut store = state.store.write().await;
    store.save_root(body)?;
    let value = store.root_value();
    drop(store);
    state.reload.request();
    Ok(Json(value))
}

async fn reload_now(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    state
        .orchestrator
        .lock()
        .await
        .reload_full()
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(json!({"status": "reloaded"})))
}

async fn export_bundle(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let store = state.store.read().await;
    let bundle = ConfigBundle::from_store(&store);
    drop(store);
    let bytes = bundle.to_gzip().map_err(ApiError::Internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"config-bundle.json.gz\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    prefer_incoming: Option<bool>,
}

async fn upload_bundle(
    State(state): State<ApiState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mode = match query.mode.as_deref() {
        Some("replace") => BundleMode::Replace,
        Some("merge") | None => BundleMode::Merge {
            prefer_incoming: query.prefer_incoming.unwrap_or(false),
        },
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown upload mode '{}'",
                other
            )))
        }
    };
    let bundle = ConfigBundle::from_gzip(&body)
        .map_err(|error| ApiError::BadRequest(error.to_string()))?;

    {
        // Snapshot the current config into backups/ before touching disk
        let store = state.store.read().await;
        let backup = ConfigBundle::from_store(&store);
        let name = format!("backup-{}.json.gz", Utc::now().format("%Y%m%dT%H%M%S"));
        let path = state.config_dir.join("backups").join(name);
        match backup.to_gzip() {
            Ok(bytes) => {
                if let Err(error) = std::fs::write(&path, bytes) {
                    warn!(%error, "failed to write pre-upload backup");
                }
            }
            Err(error) => warn!(%error, "failed to serialize pre-upload backup"),
        }
    }

    bundle
        .apply(&state.config_dir, mode)
        .map_err(ApiError::Internal)?;
    state
        .orchestrator
        .lock()
        .await
        .reload_full()
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({
        "status": "applied",
        "clients": bundle.clients.len(),
        "servers": bundle.servers.len(),
        "events": bundle.events.len(),
        "sinks": bundle.sinks.len(),
    })))
}
