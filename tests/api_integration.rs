//! Control plane integration tests
//!
//! These spin up the real axum router on an ephemeral port and exercise it
//! with an HTTP client: auth, per-file CRUD with reference cascades, bundle
//! export/upload, path confinement for raw log reads, and the data-flow
//! view.

use ircwatch::api::{self, ApiState};
use ircwatch::orchestrator::Orchestrator;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

const TOKEN: &str = "test-token";

fn write(dir: &Path, rel: &str, value: &Value) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

fn seed_config(config_dir: &Path, log_dir: &Path) {
    write(config_dir, "config.json", &json!({"pollInterval": 200}));
    write(
        config_dir,
        "clients/textclient.json",
        &json!({
            "id": "textclient",
            "type": "text",
            "name": "Text Client",
            "logDirectory": log_dir,
            "discovery": {
                "patterns": {"channels": "*/Channels/*.txt"},
                "pathExtraction": {
                    "serverPattern": "/([^/]+)/Channels/",
                    "channelPattern": "/Channels/([^/]+)\\.txt$"
                }
            },
            "serverDiscovery": {
                "type": "static",
                "servers": [{"hostname": "irc.libera.chat", "name": "Libera"}]
            },
            "parserRules": [
                {"name": "privmsg", "pattern": "^<(?P<nick>[^>]+)> (?P<msg>.+)$",
                 "messageType": "privmsg",
                 "captures": {"nickname": "nick", "content": "msg"}}
            ]
        }),
    );
    write(
        config_dir,
        "servers/libera.json",
        &json!({"id": "libera", "hostname": "irc.libera.chat", "displayName": "Libera"}),
    );
    write(config_dir, "sinks/console.json", &json!({"id": "console", "type": "console"}));
    write(
        config_dir,
        "sinks/ntfy.json",
        &json!({
            "id": "ntfy", "type": "ntfy",
            "config": {"endpoint": "https://ntfy.example.org", "topic": "irc"}
        }),
    );
    write(
        config_dir,
        "events/mention.json",
        &json!({
            "id": "mention",
            "name": "Mention",
            "baseEvent": "message",
            "serverIds": ["*"],
            "sinkIds": ["ntfy", "console"]
        }),
    );
}

async fn start_server(config_dir: &Path) -> (String, reqwest::Client) {
    let orchestrator = Orchestrator::initialize(config_dir).await.unwrap();
    let store = orchestrator.store();
    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let reload = Orchestrator::spawn_reload_worker(orchestrator.clone());
    let state = ApiState {
        store,
        orchestrator,
        reload,
        auth_token: TOKEN.to_string(),
        enable_file_ops: true,
        config_dir: config_dir.to_path_buf(),
    };
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), reqwest::Client::new())
}

fn auth(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request.header("Authorization", format!("Bearer {}", TOKEN))
}

#[tokio::test]
async fn test_health_requires_auth() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    let unauthorized = client
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);

    let wrong = client
        .get(format!("{}/api/health", base))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = auth(client.get(format!("{}/api/health", base)))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_status_and_config_roundtrip() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    let status: Value = auth(client.get(format!("{}/api/status", base)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["clients"], 1);
    assert_eq!(status["sinks"], 2);

    // PUT strips deprecated listing arrays
    let put: Value = auth(client.put(format!("{}/api/config", base)))
        .json(&json!({"pollInterval": 500, "clients": [{"id": "stale"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(put["pollInterval"], 500);
    assert!(put.get("clients").is_none());

    let on_disk: Value = serde_json::from_str(
        &fs::read_to_string(config.path().join("config.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk["pollInterval"], 500);
    assert!(on_disk.get("clients").is_none());
}

#[tokio::test]
async fn test_sink_delete_cascades_to_events() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    let deleted = auth(client.delete(format!("{}/api/config/file/sinks/ntfy", base)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    // The event file on disk no longer references the deleted sink
    let event: Value = serde_json::from_str(
        &fs::read_to_string(config.path().join("events/mention.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(event["sinkIds"], json!(["console"]));
    assert!(!config.path().join("sinks/ntfy.json").exists());

    // Deleting again is a 404
    let again = auth(client.delete(format!("{}/api/config/file/sinks/ntfy", base)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn test_file_crud_forces_filename_to_id() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    // PUT under the old name with a new id renames the file and cascades
    let renamed: Value = auth(client.put(format!("{}/api/config/file/sinks/console", base)))
        .json(&json!({"id": "terminal", "type": "console"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed["id"], "terminal");
    assert!(config.path().join("sinks/terminal.json").exists());
    assert!(!config.path().join("sinks/console.json").exists());

    let event: Value = serde_json::from_str(
        &fs::read_to_string(config.path().join("events/mention.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(event["sinkIds"], json!(["ntfy", "terminal"]));
}

#[tokio::test]
async fn test_forbidden_file_names() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    for name in ["..%2Fescape", "auth_token"] {
        let response = auth(client.get(format!("{}/api/config/file/sinks/{}", base, name)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 403, "name {} should be forbidden", name);
    }

    let unknown_category = auth(client.get(format!("{}/api/config/file/secrets/x", base)))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_category.status(), 404);
}

#[tokio::test]
async fn test_export_upload_roundtrip() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    let exported = auth(client.get(format!("{}/api/config/export", base)))
        .send()
        .await
        .unwrap();
    assert_eq!(exported.status(), 200);
    let bytes = exported.bytes().await.unwrap();

    // Remove a sink, then restore it by uploading the bundle
    auth(client.delete(format!("{}/api/config/file/sinks/ntfy", base)))
        .send()
        .await
        .unwrap();
    let uploaded: Value = auth(client.post(format!(
        "{}/api/config/upload?mode=replace",
        base
    )))
    .body(bytes.to_vec())
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(uploaded["status"], "applied");
    assert!(config.path().join("sinks/ntfy.json").exists());

    // The upload snapshotted a backup first
    let backups: Vec<_> = fs::read_dir(config.path().join("backups"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json.gz"))
        .collect();
    assert!(!backups.is_empty());
}

#[tokio::test]
async fn test_log_read_confined_to_log_directories() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let channel_dir = logs.path().join("Libera/Channels");
    fs::create_dir_all(&channel_dir).unwrap();
    fs::write(channel_dir.join("rust.txt"), "<bob> one\n<bob> two\n").unwrap();
    let (base, client) = start_server(config.path()).await;

    let allowed: Value = auth(client.get(format!("{}/api/logs/read", base)))
        .query(&[(
            "path",
            channel_dir.join("rust.txt").display().to_string(),
        )])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(allowed["total"], 2);
    assert_eq!(allowed["lines"][0], "<bob> one");

    // A file outside every client's log directory is forbidden
    let secret = config.path().join("config.json");
    let outside = auth(client.get(format!("{}/api/logs/read", base)))
        .query(&[("path", secret.display().to_string())])
        .send()
        .await
        .unwrap();
    assert_eq!(outside.status(), 403);

    let token_path = auth(client.get(format!("{}/api/logs/read", base)))
        .query(&[("path", format!("{}/auth_token.txt", config.path().display()))])
        .send()
        .await
        .unwrap();
    assert_eq!(token_path.status(), 403);
}

#[tokio::test]
async fn test_logs_targets_and_messages() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let channel_dir = logs.path().join("Libera/Channels");
    fs::create_dir_all(&channel_dir).unwrap();
    fs::write(channel_dir.join("rust.txt"), "<bob> hello\n").unwrap();
    let (base, client) = start_server(config.path()).await;

    let targets: Value = auth(client.get(format!("{}/api/logs/targets", base)))
        .query(&[("clientId", "textclient"), ("serverId", "libera")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(targets["channels"], json!(["rust"]));

    let messages: Value = auth(client.get(format!("{}/api/logs/messages", base)))
        .query(&[("clientId", "textclient"), ("target", "rust")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages["total"], 1);
    assert_eq!(messages["lines"][0], "<bob> hello");
}

#[tokio::test]
async fn test_data_flow_topology() {
    let config = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    seed_config(config.path(), logs.path());
    let (base, client) = start_server(config.path()).await;

    let flow: Value = auth(client.get(format!("{}/api/data-flow", base)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Client association computed from the static discovery hostnames
    let servers = flow["servers"].as_array().unwrap();
    assert_eq!(servers[0]["id"], "libera");
    assert_eq!(servers[0]["clients"], json!(["textclient"]));

    let events = flow["events"].as_array().unwrap();
    let routes = events[0]["routes"].as_array().unwrap();
    // client x server x two sinks
    assert_eq!(routes.len(), 2);
    assert!(routes.iter().all(|r| r["active"] == json!(true)));
}
