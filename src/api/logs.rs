//! Read-only log browsing endpoints.
//!
//! Targets and messages answer in terms of a (client, server) pair using
//! the same path extraction the pipeline uses. Raw reads and tails are
//! confined to the log directories of enabled clients by a normalized
//! prefix check, and anything near the auth token file is refused.

use crate::api::{ApiError, ApiState, AUTH_TOKEN_FILE};
use crate::config::{ClientConfig, ConfigStore, ServerConfig};
use crate::context::{MessageContext, TargetType};
use crate::discovery::ServerCatalog;
use crate::parser::ClientAdapter;
use crate::watcher::discover_client_files;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn require_file_ops(state: &ApiState) -> Result<(), ApiError> {
    if state.enable_file_ops {
        Ok(())
    } else {
        Err(ApiError::Forbidden("file operations are disabled".to_string()))
    }
}

/// Resolve a client with its effective log directory filled in.
fn effective_client(store: &ConfigStore, client_id: &str) -> Result<ClientConfig, ApiError> {
    let client = store
        .clients
        .get(client_id)
        .filter(|c| c.enabled)
        .ok_or_else(|| ApiError::NotFound(format!("client '{}' not found", client_id)))?;
    let mut client = client.clone();
    if client.log_directory.is_none() {
        client.log_directory = store.root.default_log_directory.clone();
    }
    Ok(client)
}

fn adapter_for(client: ClientConfig) -> Result<(ClientAdapter, ServerCatalog), ApiError> {
    let catalog = ServerCatalog::discover(&client).unwrap_or_else(|_| ServerCatalog::empty());
    let adapter = ClientAdapter::new(client)?;
    Ok((adapter, catalog))
}

/// Does a file's extracted context belong to this server?
fn belongs_to_server(partial: &MessageContext, server: &ServerConfig) -> bool {
    let identifier = partial
        .metadata
        .get("serverIdentifier")
        .and_then(Value::as_str);
    let hostname = partial
        .metadata
        .get("serverHostname")
        .and_then(Value::as_str);
    identifier.is_some_and(|ident| {
        ident == server.display_name || ident.eq_ignore_ascii_case(&server.id)
    }) || hostname.is_some_and(|h| h == server.hostname)
}

/// The requested path must resolve inside an enabled client's log
/// directory; symlinked escapes are caught by canonicalization.
fn check_path_allowed(store: &ConfigStore, requested: &str) -> Result<PathBuf, ApiError> {
    if requested.contains(AUTH_TOKEN_FILE.trim_end_matches(".txt")) {
        return Err(ApiError::Forbidden("forbidden path".to_string()));
    }
    let canonical = Path::new(requested)
        .canonicalize()
        .map_err(|_| ApiError::NotFound(format!("no such file: {}", requested)))?;

    let mut roots: Vec<PathBuf> = store
        .clients
        .values()
        .filter(|c| c.enabled)
        .filter_map(|c| c.log_directory.clone())
        .collect();
    if let Some(default) = &store.root.default_log_directory {
        roots.push(default.clone());
    }

    let allowed = roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .any(|root| canonical.starts_with(&root));
    if !allowed {
        return Err(ApiError::Forbidden(
            "path is outside all client log directories".to_string(),
        ));
    }
    Ok(canonical)
}

fn read_lines(path: &Path) -> Result<Vec<String>, ApiError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|error| ApiError::Internal(anyhow::anyhow!("read failed: {}", error)))?;
    Ok(contents.lines().map(str::to_string).collect())
}

fn target_type_name(target_type: TargetType) -> &'static str {
    match target_type {
        TargetType::Channel => "channel",
        TargetType::Query => "query",
        TargetType::Console => "console",
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsQuery {
    client_id: String,
    #[serde(default)]
    server_id: Option<String>,
}

pub async fn targets(
    State(state): State<ApiState>,
    Query(query): Query<TargetsQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.read().await;
    let client = effective_client(&store, &query.client_id)?;
    let server = match &query.server_id {
        Some(id) => Some(
            store
                .servers
                .get(id)
                .ok_or_else(|| ApiError::NotFound(format!("server '{}' not found", id)))?,
        ),
        None => None,
    };
    let files = discover_client_files(&client);
    let (adapter, catalog) = adapter_for(client)?;

    let mut channels = Vec::new();
    let mut queries = Vec::new();
    let mut console = false;
    for path in files {
        let partial = adapter.partial_context(&path, Some(&catalog));
        if let Some(server) = server {
            if !belongs_to_server(&partial, server) {
                continue;
            }
        }
        if let Some(target) = partial.target {
            match target.target_type {
                TargetType::Channel => channels.push(target.name),
                TargetType::Query => queries.push(target.name),
                TargetType::Console => console = true,
            }
        }
    }
    channels.sort();
    channels.dedup();
    queries.sort();
    queries.dedup();

    Ok(Json(json!({
        "clientId": query.client_id,
        "serverId": query.server_id,
        "channels": channels,
        "queries": queries,
        "console": console,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    client_id: String,
    #[serde(default)]
    server_id: Option<String>,
    target: String,
    #[serde(default, rename = "type")]
    target_type: Option<String>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn messages(
    State(state): State<ApiState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.read().await;
    let client = effective_client(&store, &query.client_id)?;
    let server = query
        .server_id
        .as_ref()
        .and_then(|id| store.servers.get(id));
    let files = discover_client_files(&client);
    let (adapter, catalog) = adapter_for(client)?;

    let located = files.into_iter().find(|path| {
        let partial = adapter.partial_context(path, Some(&catalog));
        if let Some(server) = server {
            if !belongs_to_server(&partial, server) {
                return false;
            }
        }
        match &partial.target {
            Some(target) => {
                let type_matches = query
                    .target_type
                    .as_deref()
                    .map(|t| t == target_type_name(target.target_type))
                    .unwrap_or(true);
                type_matches && target.name == query.target
            }
            None => false,
        }
    });
    let Some(path) = located else {
        return Err(ApiError::NotFound(format!(
            "no log file for target '{}'",
            query.target
        )));
    };

    let lines = read_lines(&path)?;
    let total = lines.len();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);
    let page: Vec<&String> = lines.iter().skip(offset).take(limit).collect();

    Ok(Json(json!({
        "path": path.display().to_string(),
        "target": query.target,
        "offset": offset,
        "limit": limit,
        "total": total,
        "lines": page,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverQuery {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    server_id: Option<String>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default, rename = "type")]
    target_type: Option<String>,
}

pub async fn discover(
    State(state): State<ApiState>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.read().await;
    let client_ids: Vec<String> = store
        .clients
        .values()
        .filter(|c| c.enabled)
        .filter(|c| {
            query
                .client_id
                .as_deref()
                .map(|id| id == c.id)
                .unwrap_or(true)
        })
        .map(|c| c.id.clone())
        .collect();

    let server = query
        .server_id
        .as_ref()
        .and_then(|id| store.servers.get(id));

    let mut entries = Vec::new();
    for client_id in client_ids {
        let client = effective_client(&store, &client_id)?;
        let files = discover_client_files(&client);
        let (adapter, catalog) = adapter_for(client)?;
        for path in files {
            let partial = adapter.partial_context(&path, Some(&catalog));
            if let Some(server) = server {
                if !belongs_to_server(&partial, server) {
                    continue;
                }
            }
            let identifier = partial
                .metadata
                .get("serverIdentifier")
                .and_then(Value::as_str);
            if let Some(wanted) = &query.server {
                if identifier != Some(wanted.as_str()) {
                    continue;
                }
            }
            let target = partial.target.as_ref();
            if let Some(wanted) = &query.channel {
                let is_match = target.is_some_and(|t| {
                    t.target_type == TargetType::Channel && &t.name == wanted
                });
                if !is_match {
                    continue;
                }
            }
            if let Some(wanted) = &query.query {
                let is_match = target
                    .is_some_and(|t| t.target_type == TargetType::Query && &t.name == wanted);
                if !is_match {
                    continue;
                }
            }
            if let Some(wanted) = &query.target_type {
                let is_match =
                    target.is_some_and(|t| target_type_name(t.target_type) == wanted);
                if !is_match {
                    continue;
                }
            }
            entries.push(json!({
                "clientId": client_id,
                "path": path.display().to_string(),
                "serverIdentifier": identifier,
                "serverHostname": partial.metadata.get("serverHostname"),
                "target": target.map(|t| json!({
                    "name": t.name,
                    "type": target_type_name(t.target_type),
                })),
            }));
        }
    }
    Ok(Json(json!({"files": entries})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn read_file(
    State(state): State<ApiState>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let store = state.store.read().await;
    let path = check_path_allowed(&store, &query.path)?;
    let lines = read_lines(&path)?;
    let total = lines.len();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);
    let page: Vec<&String> = lines.iter().skip(offset).take(limit).collect();
    Ok(Json(json!({
        "path": path.display().to_string(),
        "offset": offset,
        "limit": limit,
        "total": total,
        "lines": page,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailQuery {
    path: String,
    #[serde(default)]
    lines: Option<usize>,
}

pub async fn tail_file(
    State(state): State<ApiState>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Value>, ApiError> {
    require_file_ops(&state)?;
    let store = state.store.read().await;
    let path = check_path_allowed(&store, &query.path)?;
    let lines = read_lines(&path)?;
    let count = query.lines.unwrap_or(50);
    let start = lines.len().saturating_sub(count);
    Ok(Json(json!({
        "path": path.display().to_string(),
        "total": lines.len(),
        "lines": &lines[start..],
    })))
}
