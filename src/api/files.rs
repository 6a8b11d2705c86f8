//! Per-file config CRUD.
//!
//! Categories are the four entity directories. Names are validated against
//! path traversal, and anything touching the auth token file is refused
//! outright. Writes force the filename to follow the body's `id`, cascade
//! renames and deletions through event references, and finish by requesting
//! a reload.

use crate::api::{ApiError, ApiState, AUTH_TOKEN_FILE};
use crate::config::ConfigKind;
use axum::extract::{Path as UrlPath, State};
use axum::Json;
use serde_json::{json, Value};

fn require_file_ops(state: &ApiState) -> Result<(), ApiError> {
    if state.enable_file_ops {
        Ok(())
    } else {
        Err(ApiError::Forbidden("file operations are disabled".to_string()))
    }
}

fn parse_category(category: &str) -> Result<ConfigKind, ApiError> {
    ConfigKind::from_name(category)
        .ok_or_else(|| ApiError::NotFound(format!("unknown category '{}'", category)))
}

/// Normalize and vet a file name: no separators, no parent traversal, and
/// nothing that could address the auth token.
fn sanitize_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim().trim_end_matches(".json");
    if name.is_empty() {
        return Err(ApiError::BadRequest("empty file name".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::Forbidden("invalid file name".to_string()));
    }
    if name.contains(AUTH_TOKEN_FILE.trim_end_matches(".txt")) {
        return Err(ApiError::Forbidden("forbidden file name".to_string()));
    }
    Ok(name.to_string())
}

pub async fn list_files(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let store = state.store.read().await;
    let mut listing = serde_json::Map::new();
    for kind in ConfigKind::all() {
        let files: Vec<Value> = store
            .ids(kind)
            .into_iter()
            .map(|id| json!({"id": id, "filename": format!("{}.json", id)}))
            .collect();
        listing.insert(kind.dir_name().to_string(), Value::Array(files));
    }
    Ok(Json(Value::Object(listing)))
}

pub async fn get_file(
    State(state): State<ApiState>,
    UrlPath((category, name)): UrlPath<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let kind = parse_category(&category)?;
    let name = sanitize_name(&name)?;
    let store = state.store.read().await;
    store
        .entity_value(kind, &name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{}/{} not found", category, name)))
}

pub async fn save_file(
    State(state): State<ApiState>,
    UrlPath((category, name)): UrlPath<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let kind = parse_category(&category)?;
    let name = sanitize_name(&name)?;
    if !body.is_object() {
        return Err(ApiError::BadRequest("body must be a JSON object".to_string()));
    }
    if let Some(id) = body.get("id").and_then(Value::as_str) {
        sanitize_name(id)?;
    }

    let id = {
        let mut store = state.store.write().await;
        store.upsert_entity(kind, Some(&name), body)?
    };
    state.reload.request();
    Ok(Json(json!({"status": "saved", "id": id})))
}

pub async fn delete_file(
    State(state): State<ApiState>,
    UrlPath((category, name)): UrlPath<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let kind = parse_category(&category)?;
    let name = sanitize_name(&name)?;

    let existed = {
        let mut store = state.store.write().await;
        store.delete_entity(kind, &name)?
    };
    if !existed {
        return Err(ApiError::NotFound(format!("{}/{} not found", category, name)));
    }
    state.reload.request();
    Ok(Json(json!({"status": "deleted", "id": name})))
}
