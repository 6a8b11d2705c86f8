//! Config bundles
//!
//! A bundle is one gzip-compressed JSON document carrying the root config
//! and every entity document. Bundles back the export/upload API endpoints
//! and the `backups/` restore path at startup.

use crate::config::{atomic_write, ConfigKind, ConfigStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// How an incoming bundle is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMode {
    /// Remove existing entity files, then write everything from the bundle
    Replace,
    /// Add missing entities; overwrite existing ones only when
    /// `prefer_incoming` is set
    Merge { prefer_incoming: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack_config_dir: Option<String>,
}

/// The bundle document. Entity documents are kept as raw JSON so a bundle
/// survives schema evolution between export and import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBundle {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BundleMetadata,
    pub config: Value,
    #[serde(default)]
    pub clients: Vec<Value>,
    #[serde(default)]
    pub servers: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub sinks: Vec<Value>,
}

impl ConfigBundle {
    pub const VERSION: u32 = 1;

    /// Snapshot the store into a bundle.
    pub fn from_store(store: &ConfigStore) -> Self {
        let collect = |kind: ConfigKind| -> Vec<Value> {
            store
                .ids(kind)
                .iter()
                .filter_map(|id| store.entity_value(kind, id))
                .collect()
        };
        Self {
            version: Self::VERSION,
            timestamp: Utc::now(),
            metadata: BundleMetadata {
                source_config_path: Some(store.root_path().display().to_string()),
                config_directory: Some(store.config_dir().display().to_string()),
                unpack_config_dir: None,
            },
            config: store.root_value(),
            clients: collect(ConfigKind::Clients),
            servers: collect(ConfigKind::Servers),
            events: collect(ConfigKind::Events),
            sinks: collect(ConfigKind::Sinks),
        }
    }

    /// Serialize and gzip.
    pub fn to_gzip(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self).context("failed to serialize bundle")?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        encoder.finish().context("failed to compress bundle")
    }

    /// Gunzip and parse.
    pub fn from_gzip(bytes: &[u8]) -> Result<Self> {
        let mut decoder = GzDecoder::new(bytes);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .context("failed to decompress bundle")?;
        serde_json::from_slice(&json).context("failed to parse bundle")
    }

    /// Write the bundle's documents into `config_dir`. The caller reloads
    /// the store afterwards; this only touches disk.
    pub fn apply(&self, config_dir: &Path, mode: BundleMode) -> Result<()> {
        ConfigStore::ensure_layout(config_dir)?;

        if mode == BundleMode::Replace {
            for kind in ConfigKind::all() {
                let dir = config_dir.join(kind.dir_name());
                for entry in fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "json") {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }

        let overwrite = match mode {
            BundleMode::Replace => true,
            BundleMode::Merge { prefer_incoming } => prefer_incoming,
        };

        let root_path = config_dir.join("config.json");
        if overwrite || !root_path.exists() {
            atomic_write(&root_path, &serde_json::to_vec_pretty(&self.config)?)?;
        }

        for (kind, documents) in [
            (ConfigKind::Clients, &self.clients),
            (ConfigKind::Servers, &self.servers),
            (ConfigKind::Events, &self.events),
            (ConfigKind::Sinks, &self.sinks),
        ] {
            for document in documents {
                let Some(id) = document.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let path = config_dir
                    .join(kind.dir_name())
                    .join(format!("{}.json", id));
                if path.exists() && !overwrite {
                    continue;
                }
                atomic_write(&path, &serde_json::to_vec_pretty(document)?)?;
            }
        }
        Ok(())
    }
}

/// Find the newest bundle under `backups/` by its embedded timestamp.
pub fn newest_backup(backups_dir: &Path) -> Option<(std::path::PathBuf, ConfigBundle)> {
    let entries = fs::read_dir(backups_dir).ok()?;
    let mut newest: Option<(std::path::PathBuf, ConfigBundle)> = None;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.ends_with(".json.gz") {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else { continue };
        let Ok(bundle) = ConfigBundle::from_gzip(&bytes) else {
            continue;
        };
        let newer = newest
            .as_ref()
            .map(|(_, current)| bundle.timestamp > current.timestamp)
            .unwrap_or(true);
        if newer {
            newest = Some((path, bundle));
        }
    }
    newest
}
