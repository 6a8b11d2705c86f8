//! Configuration model
//!
//! Five kinds of configuration live on disk: the root `config.json` plus one
//! JSON document per client, server, event, and sink under
//! `<configDir>/{clients,servers,events,sinks}/`. Every entity is addressed
//! by a string `id` that is kept in sync with its filename stem.
//!
//! # Examples
//!
//! A client describing a plain-text IRC log layout:
//!
//! ```json
//! {
//!   "id": "weechat",
//!   "type": "text",
//!   "name": "WeeChat",
//!   "enabled": true,
//!   "logDirectory": "/home/user/.weechat/logs",
//!   "discovery": {
//!     "patterns": {"channels": "irc.*.#*.weechatlog"},
//!     "pathExtraction": {
//!       "serverPattern": "irc\\.([^.]+)\\.",
//!       "channelPattern": "\\.(#[^.]+)\\.weechatlog$"
//!     }
//!   },
//!   "parserRules": [
//!     {
//!       "name": "privmsg",
//!       "pattern": "^(?P<timestamp>\\S+ \\S+)\\t(?P<nickname>[^\\t]+)\\t(?P<content>.*)$",
//!       "messageType": "privmsg",
//!       "captures": {"timestamp": "timestamp", "nickname": "nickname", "content": "content"}
//!     }
//!   ]
//! }
//! ```

mod bundle;
mod env;
mod store;

pub use bundle::{newest_backup, BundleMode, ConfigBundle};
pub use env::substitute_env;
pub use store::{atomic_write, ConfigKind, ConfigStore};

use crate::error::ConfigError;
use crate::filter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Open metadata map carried by most entities.
pub type Metadata = serde_json::Map<String, Value>;

/// Minimum allowed watcher poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Root configuration (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    /// Watcher poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Verbose logging
    #[serde(default)]
    pub debug: bool,
    /// Fallback log directory for clients that do not set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_log_directory: Option<PathBuf>,
    /// Directory holding the per-entity config subdirectories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_directory: Option<PathBuf>,
    /// Re-read all watched files from offset zero on startup
    #[serde(default)]
    pub rescan_logs_on_startup: bool,
    /// HTTP control plane settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSettings>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            debug: false,
            default_log_directory: None,
            config_directory: None,
            rescan_logs_on_startup: false,
            api: None,
        }
    }
}

impl RootConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                config_type: "config",
                config_id: "config".to_string(),
                field: "pollInterval".to_string(),
                reason: format!("must be at least {} ms", MIN_POLL_INTERVAL_MS),
            });
        }
        if let Some(api) = &self.api {
            api.validate()?;
        }
        Ok(())
    }
}

/// HTTP control plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
    /// Bearer token; generated to `auth_token.txt` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Allow per-file CRUD and raw log reads over HTTP
    #[serde(default = "default_true")]
    pub enable_file_ops: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            host: default_api_host(),
            auth_token: None,
            enable_file_ops: true,
        }
    }
}

impl ApiSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                config_type: "config",
                config_id: "config".to_string(),
                field: "api.port".to_string(),
                reason: "port must be in 1..=65535".to_string(),
            });
        }
        Ok(())
    }
}

/// Instructions for discovering and parsing one chat client's logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub id: String,
    /// Client flavor label (free-form, e.g. "weechat", "thelounge")
    #[serde(rename = "type", default)]
    pub client_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_discovery: Option<ServerDiscoveryConfig>,
    #[serde(default)]
    pub file_type: FileTypeConfig,
    #[serde(default)]
    pub parser_rules: Vec<ParserRule>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField {
                config_type: "client",
                config_id: self.id.clone(),
                field: "id",
            });
        }
        self.discovery.path_extraction.validate(&self.id)?;
        for rule in &self.parser_rules {
            rule.validate(&self.id)?;
        }
        if let Some(discovery) = &self.server_discovery {
            discovery.validate(&self.id)?;
        }
        if let Some(interval) = self.file_type.poll_interval {
            if interval < MIN_POLL_INTERVAL_MS {
                return Err(ConfigError::InvalidValue {
                    config_type: "client",
                    config_id: self.id.clone(),
                    field: "fileType.pollInterval".to_string(),
                    reason: format!("must be at least {} ms", MIN_POLL_INTERVAL_MS),
                });
            }
        }
        Ok(())
    }
}

/// Glob patterns and path-extraction regexes for locating log files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub patterns: PatternSet,
    #[serde(default)]
    pub path_extraction: PathExtraction,
}

/// Glob patterns per file role, relative to the client's log directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatternSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<String>,
}

/// Regex + capture-group pairs extracting context from a file path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathExtraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pattern: Option<String>,
    #[serde(default = "default_group")]
    pub server_group: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_pattern: Option<String>,
    #[serde(default = "default_group")]
    pub channel_group: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_pattern: Option<String>,
    #[serde(default = "default_group")]
    pub query_group: usize,
    /// Paths matching this regex are console (server-window) logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_pattern: Option<String>,
}

impl PathExtraction {
    fn validate(&self, client_id: &str) -> Result<(), ConfigError> {
        for (field, pattern) in [
            ("pathExtraction.serverPattern", &self.server_pattern),
            ("pathExtraction.channelPattern", &self.channel_pattern),
            ("pathExtraction.queryPattern", &self.query_pattern),
            ("pathExtraction.consolePattern", &self.console_pattern),
        ] {
            if let Some(pattern) = pattern {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    config_type: "client",
                    config_id: client_id.to_string(),
                    field: field.to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

/// How to map log file paths and contents to canonical server identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerDiscoveryConfig {
    /// A fixed list of known servers
    #[serde(rename_all = "camelCase")]
    Static { servers: Vec<StaticServerEntry> },
    /// Glob candidate files and regex their bodies for a hostname
    #[serde(rename_all = "camelCase")]
    Filesystem {
        search_pattern: String,
        hostname_pattern: String,
        #[serde(default = "default_group")]
        hostname_group: usize,
    },
    /// A JSON catalog file with an array of network entries
    #[serde(rename_all = "camelCase")]
    Json {
        json_path: PathBuf,
        array_path: String,
        hostname_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name_field: Option<String>,
    },
    /// Reserved; accepted in the schema but not implemented
    #[serde(rename_all = "camelCase")]
    Sqlite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database_path: Option<PathBuf>,
    },
}

impl ServerDiscoveryConfig {
    fn validate(&self, client_id: &str) -> Result<(), ConfigError> {
        if let ServerDiscoveryConfig::Filesystem {
            hostname_pattern, ..
        } = self
        {
            regex::Regex::new(hostname_pattern).map_err(|source| ConfigError::InvalidRegex {
                config_type: "client",
                config_id: client_id.to_string(),
                field: "serverDiscovery.hostnamePattern".to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// One server in a static discovery list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticServerEntry {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Log file format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTypeConfig {
    #[serde(rename = "type", default)]
    pub kind: FileKind,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Per-client override of the global poll interval; more specific wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

impl Default for FileTypeConfig {
    fn default() -> Self {
        Self {
            kind: FileKind::Text,
            encoding: default_encoding(),
            poll_interval: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Text,
    Json,
    /// Reserved; accepted in the schema but not implemented
    Sqlite,
}

/// One priority-ordered regex rule turning a log line into a message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    /// privmsg, notice, join, part, quit, nick, kick, mode, topic, system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Semantic field -> named capture group
    #[serde(default)]
    pub captures: HashMap<String, String>,
    /// Higher priority rules are tried first
    #[serde(default)]
    pub priority: i32,
    /// A match discards the line
    #[serde(default)]
    pub skip: bool,
}

impl ParserRule {
    fn validate(&self, client_id: &str) -> Result<(), ConfigError> {
        filter::compile_regex(&self.pattern, &self.flags).map_err(|source| {
            ConfigError::InvalidRegex {
                config_type: "client",
                config_id: client_id.to_string(),
                field: format!("parserRules[{}].pattern", self.name),
                source,
            }
        })?;
        Ok(())
    }
}

/// User details attached to a server's nickname table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One IRC network the user connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub client_nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// nickname -> user details merged into matching senders
    #[serde(default)]
    pub users: HashMap<String, UserInfo>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField {
                config_type: "server",
                config_id: self.id.clone(),
                field: "id",
            });
        }
        if self.hostname.is_empty() {
            return Err(ConfigError::MissingField {
                config_type: "server",
                config_id: self.id.clone(),
                field: "hostname",
            });
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err(ConfigError::InvalidValue {
                    config_type: "server",
                    config_id: self.id.clone(),
                    field: "port".to_string(),
                    reason: "port must be in 1..=65535".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    Ntfy,
    Webhook,
    Console,
    File,
    Custom,
}

/// Title/body template with an output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SinkTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub format: TemplateFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

/// Sliding-window delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u32>,
}

/// A notification destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub sink_type: SinkType,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Type-specific settings (endpoint, topic, url, path, ...)
    #[serde(default)]
    pub config: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SinkTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// When present, bounds the keys events may override per sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_metadata: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_transforms: Option<Vec<PayloadTransform>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField {
                config_type: "sink",
                config_id: self.id.clone(),
                field: "id",
            });
        }
        if let Some(limits) = &self.rate_limit {
            for (field, limit) in [
                ("rateLimit.maxPerMinute", limits.max_per_minute),
                ("rateLimit.maxPerHour", limits.max_per_hour),
            ] {
                if limit == Some(0) {
                    return Err(ConfigError::InvalidValue {
                        config_type: "sink",
                        config_id: self.id.clone(),
                        field: field.to_string(),
                        reason: "limit must be at least 1".to_string(),
                    });
                }
            }
        }
        match self.sink_type {
            SinkType::Ntfy => {
                self.require_config_url("endpoint")?;
                self.require_config_str("topic")?;
            }
            SinkType::Webhook => self.require_config_url("url")?,
            SinkType::File => self.require_config_str("path")?,
            SinkType::Console | SinkType::Custom => {}
        }
        if let Some(transforms) = &self.payload_transforms {
            if self.sink_type != SinkType::Webhook {
                return Err(ConfigError::InvalidValue {
                    config_type: "sink",
                    config_id: self.id.clone(),
                    field: "payloadTransforms".to_string(),
                    reason: "only webhook sinks support payload transforms".to_string(),
                });
            }
            for transform in transforms {
                transform.validate(&self.id)?;
            }
        }
        Ok(())
    }

    fn require_config_str(&self, key: &str) -> Result<(), ConfigError> {
        match self.config.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(()),
            _ => Err(ConfigError::InvalidValue {
                config_type: "sink",
                config_id: self.id.clone(),
                field: format!("config.{}", key),
                reason: "required non-empty string".to_string(),
            }),
        }
    }

    fn require_config_url(&self, key: &str) -> Result<(), ConfigError> {
        self.require_config_str(key)?;
        let url = self.config.get(key).and_then(Value::as_str).unwrap_or("");
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                config_type: "sink",
                config_id: self.id.clone(),
                field: format!("config.{}", key),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    /// Type-specific config value as a string, if present.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Json,
    Text,
    Form,
    Custom,
}

/// Header value in a payload transform: literal or template-rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Template { template: String },
    Literal(String),
}

/// Config-driven recipe for constructing a webhook request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadTransform {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterGroup>,
    #[serde(default)]
    pub body_format: BodyFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_template: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_template: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, HeaderValue>>,
    #[serde(default)]
    pub priority: i32,
}

impl PayloadTransform {
    fn validate(&self, sink_id: &str) -> Result<(), ConfigError> {
        let template_present = match self.body_format {
            BodyFormat::Json => self.json_template.is_some(),
            BodyFormat::Text => self.text_template.is_some(),
            BodyFormat::Form => self.form_template.is_some(),
            // Custom bodies come from event metadata at send time
            BodyFormat::Custom => true,
        };
        if !template_present {
            return Err(ConfigError::InvalidValue {
                config_type: "sink",
                config_id: sink_id.to_string(),
                field: format!("payloadTransforms[{}]", self.name),
                reason: format!("bodyFormat {:?} requires a matching template", self.body_format),
            });
        }
        if let Some(condition) = &self.condition {
            filter::compile(condition).map_err(|source| ConfigError::Filter {
                config_type: "sink",
                config_id: sink_id.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Coarse event category mapped onto underlying message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseEvent {
    Message,
    Join,
    Part,
    Quit,
    Nick,
    Kick,
    Mode,
    Topic,
    Connect,
    Disconnect,
    Any,
}

/// Boolean combinator for a filter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// Comparison operator for a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Matches,
    NotMatches,
    Exists,
    NotExists,
    In,
    NotIn,
}

/// A boolean tree of filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub operator: FilterOperator,
    pub filters: Vec<FilterNode>,
}

/// Either a nested group or a comparison leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Leaf(FilterConfig),
}

/// One comparison against a dotted context path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub field: String,
    pub operator: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

/// A declarative routing rule from matched messages to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_event: BaseEvent,
    /// Server ids this event applies to; `"*"` means every enabled server
    #[serde(default)]
    pub server_ids: Vec<String>,
    #[serde(default)]
    pub sink_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterGroup>,
    /// May carry `host` context overrides and per-sink `sink.<id>` overrides
    #[serde(default)]
    pub metadata: Metadata,
}

impl EventConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField {
                config_type: "event",
                config_id: self.id.clone(),
                field: "id",
            });
        }
        if let Some(filters) = &self.filters {
            filter::compile(filters).map_err(|source| ConfigError::Filter {
                config_type: "event",
                config_id: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Per-sink metadata overrides, bounded by the sink's `allowedMetadata`.
    ///
    /// The current shape is `metadata.sink.<sinkId>`; the legacy flat shape
    /// `metadata.<sinkId>` is still honored for webhook configs written
    /// before the nested layout existed.
    pub fn sink_metadata(&self, sink: &SinkConfig) -> Metadata {
        let nested = self
            .metadata
            .get("sink")
            .and_then(Value::as_object)
            .and_then(|m| m.get(&sink.id))
            .and_then(Value::as_object);
        let legacy = if sink.sink_type == SinkType::Webhook {
            self.metadata.get(&sink.id).and_then(Value::as_object)
        } else {
            None
        };
        let mut merged = Metadata::new();
        for source in [legacy, nested].into_iter().flatten() {
            for (key, value) in source {
                merged.insert(key.clone(), value.clone());
            }
        }
        if let Some(allowed) = &sink.allowed_metadata {
            merged.retain(|key, _| allowed.iter().any(|a| a == key));
        }
        merged
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_api_port() -> u16 {
    8675
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_group() -> usize {
    1
}
fn default_encoding() -> String {
    "utf8".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_client() {
        let raw = json!({
            "id": "weechat",
            "type": "text",
            "name": "WeeChat",
            "logDirectory": "/logs",
            "discovery": {
                "patterns": {"channels": "irc.*.#*.weechatlog"},
                "pathExtraction": {"serverPattern": "irc\\.([^.]+)\\.", "serverGroup": 1}
            },
            "parserRules": [
                {"name": "privmsg", "pattern": "^<(?P<nickname>[^>]+)> (?P<content>.*)$",
                 "messageType": "privmsg",
                 "captures": {"nickname": "nickname", "content": "content"},
                 "priority": 10}
            ]
        });
        let client: ClientConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(client.id, "weechat");
        assert!(client.enabled);
        assert_eq!(client.parser_rules.len(), 1);
        assert_eq!(client.parser_rules[0].priority, 10);
        client.validate().unwrap();
    }

    #[test]
    fn test_invalid_parser_rule_regex_rejected() {
        let raw = json!({
            "id": "bad",
            "parserRules": [{"name": "broken", "pattern": "([unclosed"}]
        });
        let client: ClientConfig = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            client.validate(),
            Err(ConfigError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_filter_group_nested_deserialization() {
        let raw = json!({
            "operator": "AND",
            "filters": [
                {"field": "message.content", "operator": "contains", "value": "alert"},
                {"operator": "OR", "filters": [
                    {"field": "target.type", "operator": "equals", "value": "query"},
                    {"field": "sender.nickname", "operator": "equals", "value": "admin"}
                ]}
            ]
        });
        let group: FilterGroup = serde_json::from_value(raw).unwrap();
        assert_eq!(group.operator, FilterOperator::And);
        assert_eq!(group.filters.len(), 2);
        assert!(matches!(group.filters[0], FilterNode::Leaf(_)));
        assert!(matches!(group.filters[1], FilterNode::Group(_)));
    }

    #[test]
    fn test_server_discovery_variants() {
        let fs: ServerDiscoveryConfig = serde_json::from_value(json!({
            "type": "filesystem",
            "searchPattern": "*/network.txt",
            "hostnamePattern": "host=(\\S+)",
            "hostnameGroup": 1
        }))
        .unwrap();
        assert!(matches!(fs, ServerDiscoveryConfig::Filesystem { .. }));

        let js: ServerDiscoveryConfig = serde_json::from_value(json!({
            "type": "json",
            "jsonPath": "/cfg/config.js",
            "arrayPath": "networks",
            "hostnameField": "host",
            "uuidField": "uuid"
        }))
        .unwrap();
        assert!(matches!(js, ServerDiscoveryConfig::Json { .. }));
    }

    #[test]
    fn test_sink_validation() {
        let sink: SinkConfig = serde_json::from_value(json!({
            "id": "push",
            "type": "ntfy",
            "config": {"endpoint": "https://ntfy.sh", "topic": "irc"}
        }))
        .unwrap();
        sink.validate().unwrap();

        let missing: SinkConfig = serde_json::from_value(json!({
            "id": "push",
            "type": "ntfy",
            "config": {"endpoint": "https://ntfy.sh"}
        }))
        .unwrap();
        assert!(missing.validate().is_err());

        let zero_limit: SinkConfig = serde_json::from_value(json!({
            "id": "c",
            "type": "console",
            "rateLimit": {"maxPerMinute": 0}
        }))
        .unwrap();
        assert!(zero_limit.validate().is_err());
    }

    #[test]
    fn test_event_sink_metadata_bounded() {
        let event: EventConfig = serde_json::from_value(json!({
            "id": "mention",
            "baseEvent": "message",
            "metadata": {
                "sink": {"push": {"title": "custom", "forbidden": "x"}}
            }
        }))
        .unwrap();
        let sink: SinkConfig = serde_json::from_value(json!({
            "id": "push",
            "type": "console",
            "allowedMetadata": ["title"]
        }))
        .unwrap();
        let meta = event.sink_metadata(&sink);
        assert_eq!(meta.get("title"), Some(&json!("custom")));
        assert!(meta.get("forbidden").is_none());
    }

    #[test]
    fn test_legacy_sink_metadata_shape_webhook_only() {
        let event: EventConfig = serde_json::from_value(json!({
            "id": "e",
            "baseEvent": "any",
            "metadata": {"hook": {"body": "legacy"}}
        }))
        .unwrap();
        let webhook: SinkConfig = serde_json::from_value(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"}
        }))
        .unwrap();
        let console: SinkConfig = serde_json::from_value(json!({
            "id": "hook", "type": "console"
        }))
        .unwrap();
        assert_eq!(
            event.sink_metadata(&webhook).get("body"),
            Some(&json!("legacy"))
        );
        assert!(event.sink_metadata(&console).get("body").is_none());
    }

    #[test]
    fn test_root_config_poll_interval_floor() {
        let config: RootConfig =
            serde_json::from_value(json!({"pollInterval": 50})).unwrap();
        assert!(config.validate().is_err());
        let config: RootConfig =
            serde_json::from_value(json!({"pollInterval": 100})).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_header_value_shapes() {
        let literal: HeaderValue = serde_json::from_value(json!("text/plain")).unwrap();
        assert!(matches!(literal, HeaderValue::Literal(_)));
        let templated: HeaderValue =
            serde_json::from_value(json!({"template": "{{event.name}}"})).unwrap();
        assert!(matches!(templated, HeaderValue::Template { .. }));
    }
}
