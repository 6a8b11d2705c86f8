//! Server discovery
//!
//! Log file paths rarely carry a server hostname directly; they encode a
//! directory name, a display name, or a UUID. Each client config selects a
//! strategy for building a catalog that maps those identifiers back to
//! canonical hostnames:
//!
//! - `static`: a fixed list in the config.
//! - `filesystem`: glob candidate files and regex their bodies for a
//!   hostname, remembering both the file and its directory.
//! - `json`: descend into a JSON catalog file (TheLounge-style) and pull
//!   hostname/uuid/name fields out of each network entry.
//! - `sqlite`: reserved in the schema, not implemented.

use crate::config::{ClientConfig, ServerDiscoveryConfig};
use crate::template;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One server known to the catalog.
#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub hostname: String,
    pub uuid: Option<String>,
    pub name: Option<String>,
}

/// The result of running a client's discovery strategy.
#[derive(Debug, Default)]
pub struct ServerCatalog {
    entries: Vec<DiscoveredServer>,
    path_hostnames: HashMap<PathBuf, String>,
    dir_hostnames: HashMap<PathBuf, String>,
}

impl ServerCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Run the client's configured strategy.
    pub fn discover(config: &ClientConfig) -> Result<Self> {
        let mut catalog = Self::empty();
        match &config.server_discovery {
            None => {}
            Some(ServerDiscoveryConfig::Static { servers }) => {
                for entry in servers {
                    catalog.entries.push(DiscoveredServer {
                        hostname: entry.hostname.clone(),
                        uuid: entry.uuid.clone(),
                        name: entry.name.clone(),
                    });
                }
            }
            Some(ServerDiscoveryConfig::Filesystem {
                search_pattern,
                hostname_pattern,
                hostname_group,
            }) => {
                catalog.discover_filesystem(
                    config,
                    search_pattern,
                    hostname_pattern,
                    *hostname_group,
                )?;
            }
            Some(ServerDiscoveryConfig::Json {
                json_path,
                array_path,
                hostname_field,
                uuid_field,
                name_field,
            }) => {
                catalog.discover_json(
                    json_path,
                    array_path,
                    hostname_field,
                    uuid_field.as_deref(),
                    name_field.as_deref(),
                )?;
            }
            Some(ServerDiscoveryConfig::Sqlite { .. }) => {
                warn!(client = %config.id, "sqlite server discovery is reserved and not implemented");
            }
        }
        debug!(
            client = %config.id,
            servers = catalog.entries.len(),
            "server discovery complete"
        );
        Ok(catalog)
    }

    fn discover_filesystem(
        &mut self,
        config: &ClientConfig,
        search_pattern: &str,
        hostname_pattern: &str,
        hostname_group: usize,
    ) -> Result<()> {
        let pattern = if Path::new(search_pattern).is_absolute() {
            search_pattern.to_string()
        } else {
            match &config.log_directory {
                Some(dir) => dir.join(search_pattern).to_string_lossy().into_owned(),
                None => search_pattern.to_string(),
            }
        };
        let regex = regex::Regex::new(hostname_pattern)
            .with_context(|| format!("invalid hostname pattern '{}'", hostname_pattern))?;

        for path in glob::glob(&pattern)
            .with_context(|| format!("invalid search pattern '{}'", pattern))?
            .filter_map(|p| p.ok())
        {
            let Ok(body) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Some(hostname) = regex
                .captures(&body)
                .and_then(|c| c.get(hostname_group))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };
            self.path_hostnames.insert(path.clone(), hostname.clone());
            if let Some(parent) = path.parent() {
                self.dir_hostnames
                    .insert(parent.to_path_buf(), hostname.clone());
            }
            self.entries.push(DiscoveredServer {
                hostname,
                uuid: None,
                name: None,
            });
        }
        Ok(())
    }

    fn discover_json(
        &mut self,
        json_path: &Path,
        array_path: &str,
        hostname_field: &str,
        uuid_field: Option<&str>,
        name_field: Option<&str>,
    ) -> Result<()> {
        let body = std::fs::read_to_string(json_path)
            .with_context(|| format!("failed to read {}", json_path.display()))?;
        let document: Value = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse {}", json_path.display()))?;

        let Some(Value::Array(items)) = template::resolve_path(&document, array_path) else {
            warn!(
                path = %json_path.display(),
                array_path,
                "discovery array path did not resolve to an array"
            );
            return Ok(());
        };

        for item in items {
            let Some(hostname) = template::resolve_path(item, hostname_field)
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let uuid = uuid_field
                .and_then(|f| template::resolve_path(item, f))
                .and_then(Value::as_str)
                .map(str::to_string);
            let name = name_field
                .and_then(|f| template::resolve_path(item, f))
                .and_then(Value::as_str)
                .map(str::to_string);
            self.entries.push(DiscoveredServer {
                hostname,
                uuid,
                name,
            });
        }
        Ok(())
    }

    pub fn entries(&self) -> &[DiscoveredServer] {
        &self.entries
    }

    /// All hostnames known to the catalog.
    pub fn hostnames(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.hostname.as_str()).collect()
    }

    /// Hostname for a log file path: an exact file match, a match on any
    /// ancestor directory, or a path component carrying a known UUID
    /// (full or last-three-segment fragment).
    pub fn hostname_for_path(&self, path: &Path) -> Option<&str> {
        if let Some(hostname) = self.path_hostnames.get(path) {
            return Some(hostname);
        }
        for ancestor in path.ancestors().skip(1) {
            if let Some(hostname) = self.dir_hostnames.get(ancestor) {
                return Some(hostname);
            }
        }
        for component in path.iter().filter_map(|c| c.to_str()) {
            for entry in &self.entries {
                if let Some(uuid) = &entry.uuid {
                    if uuid_fragment_matches(uuid, component) {
                        return Some(&entry.hostname);
                    }
                }
            }
        }
        None
    }

    /// Hostname for a path-derived identifier: a catalog name, the
    /// hostname itself, or a UUID in full or last-three-segment form.
    pub fn hostname_for_identifier(&self, identifier: &str) -> Option<&str> {
        for entry in &self.entries {
            if entry.name.as_deref() == Some(identifier) || entry.hostname == identifier {
                return Some(&entry.hostname);
            }
            if let Some(uuid) = &entry.uuid {
                if uuid_fragment_matches(uuid, identifier) {
                    return Some(&entry.hostname);
                }
            }
        }
        None
    }
}

/// TheLounge names log directories after either the full network UUID or
/// its last three dash segments.
fn uuid_fragment_matches(uuid: &str, candidate: &str) -> bool {
    if candidate.contains(uuid) {
        return true;
    }
    let segments: Vec<&str> = uuid.split('-').collect();
    if segments.len() >= 3 {
        let fragment = segments[segments.len() - 3..].join("-");
        if !fragment.is_empty() && candidate.contains(&fragment) {
            return true;
        }
    }
    false
}
