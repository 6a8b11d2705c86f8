//! Config store
//!
//! Loads the root `config.json` plus the per-entity documents under
//! `{clients,servers,events,sinks}/`, validates them, repairs what can be
//! repaired (dangling references, filenames out of sync with ids), and is
//! the single in-memory truth for the rest of the process. All writes are
//! atomic: content goes to `<path>.tmp`, is fsynced, then renamed over the
//! destination.

use crate::config::{
    substitute_env, ClientConfig, EventConfig, RootConfig, ServerConfig, SinkConfig,
};
use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Root-level arrays from the deprecated single-file layout; stripped on
/// both read and write.
const LEGACY_ROOT_ARRAYS: [&str; 4] = ["clients", "servers", "events", "sinks"];

/// The four entity categories stored as per-file JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Clients,
    Servers,
    Events,
    Sinks,
}

impl ConfigKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ConfigKind::Clients => "clients",
            ConfigKind::Servers => "servers",
            ConfigKind::Events => "events",
            ConfigKind::Sinks => "sinks",
        }
    }

    pub fn all() -> [ConfigKind; 4] {
        [
            ConfigKind::Clients,
            ConfigKind::Servers,
            ConfigKind::Events,
            ConfigKind::Sinks,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "clients" => Some(ConfigKind::Clients),
            "servers" => Some(ConfigKind::Servers),
            "events" => Some(ConfigKind::Events),
            "sinks" => Some(ConfigKind::Sinks),
            _ => None,
        }
    }
}

/// An entity that lives as one JSON file keyed by `id`.
pub trait ConfigEntity: Serialize + DeserializeOwned + Clone {
    const KIND: ConfigKind;
    fn id(&self) -> &str;
    fn validate_entity(&self) -> Result<(), ConfigError>;
}

impl ConfigEntity for ClientConfig {
    const KIND: ConfigKind = ConfigKind::Clients;
    fn id(&self) -> &str {
        &self.id
    }
    fn validate_entity(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

impl ConfigEntity for ServerConfig {
    const KIND: ConfigKind = ConfigKind::Servers;
    fn id(&self) -> &str {
        &self.id
    }
    fn validate_entity(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

impl ConfigEntity for EventConfig {
    const KIND: ConfigKind = ConfigKind::Events;
    fn id(&self) -> &str {
        &self.id
    }
    fn validate_entity(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

impl ConfigEntity for SinkConfig {
    const KIND: ConfigKind = ConfigKind::Sinks;
    fn id(&self) -> &str {
        &self.id
    }
    fn validate_entity(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

/// Write `contents` to `path` atomically (tmp file + fsync + rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// In-memory registry of all loaded configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
    pub root: RootConfig,
    pub clients: BTreeMap<String, ClientConfig>,
    pub servers: BTreeMap<String, ServerConfig>,
    pub events: BTreeMap<String, EventConfig>,
    pub sinks: BTreeMap<String, SinkConfig>,
}

impl ConfigStore {
    /// Create the on-disk layout if missing.
    pub fn ensure_layout(config_dir: &Path) -> std::io::Result<()> {
        for kind in ConfigKind::all() {
            fs::create_dir_all(config_dir.join(kind.dir_name()))?;
        }
        fs::create_dir_all(config_dir.join("backups"))
    }

    /// Load and validate everything under `config_dir`.
    ///
    /// Clients, servers, and sinks are loaded first so event reference
    /// validation can prune against the full registry.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let root = Self::load_root(config_dir)?;
        let clients = Self::load_kind::<ClientConfig>(config_dir)?;
        let servers = Self::load_kind::<ServerConfig>(config_dir)?;
        let sinks = Self::load_kind::<SinkConfig>(config_dir)?;
        let events = Self::load_kind::<EventConfig>(config_dir)?;

        let mut store = Self {
            config_dir: config_dir.to_path_buf(),
            root,
            clients,
            servers,
            events,
            sinks,
        };
        store.prune_event_references()?;
        Ok(store)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn root_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn entity_path(&self, kind: ConfigKind, id: &str) -> PathBuf {
        self.config_dir
            .join(kind.dir_name())
            .join(format!("{}.json", id))
    }

    fn load_root(config_dir: &Path) -> Result<RootConfig, ConfigError> {
        let path = config_dir.join("config.json");
        if !path.exists() {
            return Ok(RootConfig::default());
        }
        let mut value = read_json(&path)?;
        strip_legacy_arrays(&mut value);
        substitute_env(&mut value, &path)?;
        let root: RootConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        root.validate()?;
        Ok(root)
    }

    /// Load one category: env substitution, id defaulting from the filename
    /// stem, schema validation, then the rename/dedup pass that keeps file
    /// names and ids in sync.
    fn load_kind<T: ConfigEntity>(config_dir: &Path) -> Result<BTreeMap<String, T>, ConfigError> {
        let dir = config_dir.join(T::KIND.dir_name());
        let mut loaded = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(loaded);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let mut value = read_json(&path)?;
            substitute_env(&mut value, &path)?;
            if let Value::Object(map) = &mut value {
                let missing_id = !matches!(map.get("id"), Some(Value::String(s)) if !s.is_empty());
                if missing_id {
                    map.insert("id".to_string(), Value::String(stem.clone()));
                }
            }

            let entity: T = serde_json::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            entity.validate_entity()?;
            let id = entity.id().to_string();

            if loaded.contains_key(&id) {
                // Two files claim the same id; the canonically named one wins.
                warn!(
                    kind = T::KIND.dir_name(),
                    id = %id,
                    file = %path.display(),
                    "duplicate id, removing mis-named file"
                );
                let _ = fs::remove_file(&path);
                continue;
            }

            if stem != id {
                let canonical = dir.join(format!("{}.json", id));
                if canonical.exists() {
                    // The canonically named file also exists and wins; the
                    // mis-named one is dropped without clobbering it.
                    warn!(
                        kind = T::KIND.dir_name(),
                        id = %id,
                        file = %path.display(),
                        "duplicate id, removing mis-named file"
                    );
                    let _ = fs::remove_file(&path);
                    continue;
                }
                info!(
                    kind = T::KIND.dir_name(),
                    from = %path.display(),
                    to = %canonical.display(),
                    "renaming config file to match id"
                );
                fs::rename(&path, &canonical).map_err(|source| ConfigError::Io {
                    path: canonical,
                    source,
                })?;
            }

            loaded.insert(id, entity);
        }
        Ok(loaded)
    }

    /// Remove event references to unknown servers and sinks, rewriting the
    /// event file when anything changed so disk matches the registry.
    fn prune_event_references(&mut self) -> Result<(), ConfigError> {
        let server_ids: Vec<String> = self.servers.keys().cloned().collect();
        let sink_ids: Vec<String> = self.sinks.keys().cloned().collect();
        let mut rewrite = Vec::new();

        for event in self.events.values_mut() {
            let mut changed = false;
            event.server_ids.retain(|id| {
                let keep = id == "*" || server_ids.iter().any(|s| s == id);
                if !keep {
                    warn!(event = %event.id, server = %id, "pruning dangling server reference");
                    changed = true;
                }
                keep
            });
            event.sink_ids.retain(|id| {
                let keep = sink_ids.iter().any(|s| s == id);
                if !keep {
                    warn!(event = %event.id, sink = %id, "pruning dangling sink reference");
                    changed = true;
                }
                keep
            });
            if changed {
                rewrite.push(event.id.clone());
            }
        }

        for id in rewrite {
            self.persist_event(&id)?;
        }
        Ok(())
    }

    fn persist_event(&self, id: &str) -> Result<(), ConfigError> {
        let Some(event) = self.events.get(id) else {
            return Ok(());
        };
        let path = self.entity_path(ConfigKind::Events, id);
        write_json(&path, event)
    }

    /// Replace the root config, stripping deprecated listing arrays, and
    /// persist it atomically.
    pub fn save_root(&mut self, mut value: Value) -> Result<(), ConfigError> {
        strip_legacy_arrays(&mut value);
        let root: RootConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Parse {
                path: self.root_path(),
                source,
            })?;
        root.validate()?;
        write_json(&self.root_path(), &root)?;
        self.root = root;
        Ok(())
    }

    /// Current root config as JSON.
    pub fn root_value(&self) -> Value {
        serde_json::to_value(&self.root).unwrap_or_default()
    }

    /// Raw JSON of one entity, if present.
    pub fn entity_value(&self, kind: ConfigKind, id: &str) -> Option<Value> {
        let value = match kind {
            ConfigKind::Clients => self.clients.get(id).map(|e| serde_json::to_value(e)),
            ConfigKind::Servers => self.servers.get(id).map(|e| serde_json::to_value(e)),
            ConfigKind::Events => self.events.get(id).map(|e| serde_json::to_value(e)),
            ConfigKind::Sinks => self.sinks.get(id).map(|e| serde_json::to_value(e)),
        };
        value.and_then(|r| r.ok())
    }

    /// Entity ids for one category.
    pub fn ids(&self, kind: ConfigKind) -> Vec<String> {
        match kind {
            ConfigKind::Clients => self.clients.keys().cloned().collect(),
            ConfigKind::Servers => self.servers.keys().cloned().collect(),
            ConfigKind::Events => self.events.keys().cloned().collect(),
            ConfigKind::Sinks => self.sinks.keys().cloned().collect(),
        }
    }

    /// Create or replace an entity from raw JSON. `previous_name` is the
    /// file the caller addressed; when the body's id differs, the old file
    /// is removed and rename cascades run so events keep pointing at the
    /// entity. The filename always follows the body's id.
    pub fn upsert_entity(
        &mut self,
        kind: ConfigKind,
        previous_name: Option<&str>,
        mut value: Value,
    ) -> Result<String, ConfigError> {
        if let (Value::Object(map), Some(name)) = (&mut value, previous_name) {
            let missing_id = !matches!(map.get("id"), Some(Value::String(s)) if !s.is_empty());
            if missing_id {
                map.insert("id".to_string(), Value::String(name.to_string()));
            }
        }
        let mut env_checked = value.clone();
        substitute_env(&mut env_checked, &self.config_dir.join(kind.dir_name()))?;

        let id = match kind {
            ConfigKind::Clients => {
                let entity: ClientConfig = parse_entity(&env_checked, kind, &self.config_dir)?;
                entity.validate()?;
                let id = entity.id.clone();
                self.clients.insert(id.clone(), entity);
                id
            }
            ConfigKind::Servers => {
                let entity: ServerConfig = parse_entity(&env_checked, kind, &self.config_dir)?;
                entity.validate()?;
                let id = entity.id.clone();
                self.servers.insert(id.clone(), entity);
                id
            }
            ConfigKind::Events => {
                let entity: EventConfig = parse_entity(&env_checked, kind, &self.config_dir)?;
                entity.validate()?;
                let id = entity.id.clone();
                self.events.insert(id.clone(), entity);
                id
            }
            ConfigKind::Sinks => {
                let entity: SinkConfig = parse_entity(&env_checked, kind, &self.config_dir)?;
                entity.validate()?;
                let id = entity.id.clone();
                self.sinks.insert(id.clone(), entity);
                id
            }
        };

        // Persist the original (pre-substitution) document so env
        // references stay referenced on disk.
        let path = self.entity_path(kind, &id);
        let pretty = serde_json::to_vec_pretty(&value).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &pretty).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        if let Some(old) = previous_name {
            if old != id {
                let old_path = self.entity_path(kind, old);
                let _ = fs::remove_file(&old_path);
                match kind {
                    ConfigKind::Servers => {
                        self.servers.remove(old);
                        self.cascade_rename(old, &id, true)?;
                    }
                    ConfigKind::Sinks => {
                        self.sinks.remove(old);
                        self.cascade_rename(old, &id, false)?;
                    }
                    ConfigKind::Clients => {
                        self.clients.remove(old);
                    }
                    ConfigKind::Events => {
                        self.events.remove(old);
                    }
                }
            }
        }

        // Pick up pruning in case the new event references unknown ids.
        if kind == ConfigKind::Events {
            self.prune_event_references()?;
        }
        Ok(id)
    }

    /// Delete an entity and cascade the removal through event references.
    pub fn delete_entity(&mut self, kind: ConfigKind, id: &str) -> Result<bool, ConfigError> {
        let existed = match kind {
            ConfigKind::Clients => self.clients.remove(id).is_some(),
            ConfigKind::Servers => self.servers.remove(id).is_some(),
            ConfigKind::Events => self.events.remove(id).is_some(),
            ConfigKind::Sinks => self.sinks.remove(id).is_some(),
        };
        let path = self.entity_path(kind, id);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| ConfigError::Io { path, source })?;
        }
        match kind {
            ConfigKind::Servers | ConfigKind::Sinks => {
                self.cascade_delete(kind, id)?;
            }
            _ => {}
        }
        Ok(existed)
    }

    fn cascade_delete(&mut self, kind: ConfigKind, id: &str) -> Result<(), ConfigError> {
        let mut rewrite = Vec::new();
        for event in self.events.values_mut() {
            let list = match kind {
                ConfigKind::Servers => &mut event.server_ids,
                ConfigKind::Sinks => &mut event.sink_ids,
                _ => continue,
            };
            let before = list.len();
            list.retain(|r| r != id);
            if list.len() != before {
                debug!(event = %event.id, removed = id, "cascading reference removal");
                rewrite.push(event.id.clone());
            }
        }
        for event_id in rewrite {
            self.persist_event(&event_id)?;
        }
        Ok(())
    }

    fn cascade_rename(
        &mut self,
        old_id: &str,
        new_id: &str,
        servers: bool,
    ) -> Result<(), ConfigError> {
        let mut rewrite = Vec::new();
        for event in self.events.values_mut() {
            let list = if servers {
                &mut event.server_ids
            } else {
                &mut event.sink_ids
            };
            let mut changed = false;
            for entry in list.iter_mut() {
                if entry == old_id {
                    *entry = new_id.to_string();
                    changed = true;
                }
            }
            if changed {
                rewrite.push(event.id.clone());
            }
        }
        for event_id in rewrite {
            self.persist_event(&event_id)?;
        }
        Ok(())
    }

    /// Effective poll interval for a client: the per-client override wins
    /// over the global setting.
    pub fn poll_interval_for(&self, client: &ClientConfig) -> u64 {
        client
            .file_type
            .poll_interval
            .unwrap_or(self.root.poll_interval)
            .max(crate::config::MIN_POLL_INTERVAL_MS)
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let pretty = serde_json::to_vec_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &pretty).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_entity<T: DeserializeOwned>(
    value: &Value,
    kind: ConfigKind,
    config_dir: &Path,
) -> Result<T, ConfigError> {
    serde_json::from_value(value.clone()).map_err(|source| ConfigError::Parse {
        path: config_dir.join(kind.dir_name()),
        source,
    })
}

fn strip_legacy_arrays(value: &mut Value) {
    if let Value::Object(map) = value {
        for key in LEGACY_ROOT_ARRAYS {
            if map.remove(key).is_some() {
                debug!(key, "stripped deprecated root-level listing array");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, value: &Value) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    fn seed_minimal(dir: &Path) {
        write(
            dir,
            "servers/libera.json",
            &json!({"id": "libera", "hostname": "irc.libera.chat", "displayName": "Libera"}),
        );
        write(dir, "sinks/console.json", &json!({"id": "console", "type": "console"}));
    }

    #[test]
    fn test_id_defaults_to_filename_stem() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "servers/libera.json",
            &json!({"hostname": "irc.libera.chat"}),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert!(store.servers.contains_key("libera"));
        assert_eq!(store.servers["libera"].id, "libera");
    }

    #[test]
    fn test_file_renamed_to_match_id() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "servers/wrong-name.json",
            &json!({"id": "libera", "hostname": "irc.libera.chat"}),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert!(store.servers.contains_key("libera"));
        assert!(tmp.path().join("servers/libera.json").exists());
        assert!(!tmp.path().join("servers/wrong-name.json").exists());
    }

    #[test]
    fn test_duplicate_id_keeps_canonical_file() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "servers/libera.json",
            &json!({"id": "libera", "hostname": "irc.libera.chat"}),
        );
        write(
            tmp.path(),
            "servers/other.json",
            &json!({"id": "libera", "hostname": "irc.example.org"}),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert_eq!(store.servers.len(), 1);
        assert_eq!(store.servers["libera"].hostname, "irc.libera.chat");
        assert!(!tmp.path().join("servers/other.json").exists());
    }

    #[test]
    fn test_dangling_event_references_pruned_and_persisted() {
        let tmp = TempDir::new().unwrap();
        seed_minimal(tmp.path());
        write(
            tmp.path(),
            "events/mention.json",
            &json!({
                "id": "mention",
                "baseEvent": "message",
                "serverIds": ["libera", "ghost"],
                "sinkIds": ["console", "missing-sink"]
            }),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        let event = &store.events["mention"];
        assert_eq!(event.server_ids, vec!["libera"]);
        assert_eq!(event.sink_ids, vec!["console"]);

        // Disk reflects the repair
        let on_disk: Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("events/mention.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["serverIds"], json!(["libera"]));
        assert_eq!(on_disk["sinkIds"], json!(["console"]));
    }

    #[test]
    fn test_wildcard_server_id_survives_pruning() {
        let tmp = TempDir::new().unwrap();
        seed_minimal(tmp.path());
        write(
            tmp.path(),
            "events/all.json",
            &json!({"id": "all", "baseEvent": "any", "serverIds": ["*"], "sinkIds": ["console"]}),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert_eq!(store.events["all"].server_ids, vec!["*"]);
    }

    #[test]
    fn test_delete_sink_cascades_to_events() {
        let tmp = TempDir::new().unwrap();
        seed_minimal(tmp.path());
        write(tmp.path(), "sinks/ntfy.json", &json!({
            "id": "ntfy", "type": "ntfy",
            "config": {"endpoint": "https://ntfy.example.org", "topic": "irc"}
        }));
        write(
            tmp.path(),
            "events/mention.json",
            &json!({
                "id": "mention",
                "baseEvent": "message",
                "serverIds": ["*"],
                "sinkIds": ["ntfy", "console"]
            }),
        );
        let mut store = ConfigStore::load(tmp.path()).unwrap();
        assert!(store.delete_entity(ConfigKind::Sinks, "ntfy").unwrap());
        assert_eq!(store.events["mention"].sink_ids, vec!["console"]);

        let on_disk: Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("events/mention.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["sinkIds"], json!(["console"]));
        assert!(!tmp.path().join("sinks/ntfy.json").exists());
    }

    #[test]
    fn test_rename_sink_cascades_to_events() {
        let tmp = TempDir::new().unwrap();
        seed_minimal(tmp.path());
        write(
            tmp.path(),
            "events/mention.json",
            &json!({
                "id": "mention",
                "baseEvent": "message",
                "serverIds": ["*"],
                "sinkIds": ["console"]
            }),
        );
        let mut store = ConfigStore::load(tmp.path()).unwrap();
        let new_id = store
            .upsert_entity(
                ConfigKind::Sinks,
                Some("console"),
                json!({"id": "terminal", "type": "console"}),
            )
            .unwrap();
        assert_eq!(new_id, "terminal");
        assert_eq!(store.events["mention"].sink_ids, vec!["terminal"]);
        assert!(tmp.path().join("sinks/terminal.json").exists());
        assert!(!tmp.path().join("sinks/console.json").exists());

        let on_disk: Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("events/mention.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["sinkIds"], json!(["terminal"]));
    }

    #[test]
    fn test_legacy_root_arrays_stripped() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "config.json",
            &json!({
                "pollInterval": 500,
                "clients": [{"id": "stale"}],
                "sinks": []
            }),
        );
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert_eq!(store.root.poll_interval, 500);
        let value = store.root_value();
        assert!(value.get("clients").is_none());
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/file.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        atomic_write(&path, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_poll_interval_override_more_specific_wins() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "config.json", &json!({"pollInterval": 2000}));
        write(
            tmp.path(),
            "clients/fast.json",
            &json!({"id": "fast", "fileType": {"type": "text", "pollInterval": 250}}),
        );
        write(tmp.path(), "clients/slow.json", &json!({"id": "slow"}));
        let store = ConfigStore::load(tmp.path()).unwrap();
        assert_eq!(store.poll_interval_for(&store.clients["fast"]), 250);
        assert_eq!(store.poll_interval_for(&store.clients["slow"]), 2000);
    }
}
