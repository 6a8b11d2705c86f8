//! Event processing
//!
//! Holds a snapshot of the enabled events plus the server and sink tables,
//! compiled once per reload. For each incoming context it enriches the
//! server and sender from the registry, maps the message type through the
//! base-event table, and evaluates per-event filters. Every matching event
//! fires, each with its own copy of the context carrying the event summary
//! and any per-event host overrides.

use crate::config::{BaseEvent, ConfigStore, EventConfig, ServerConfig};
use crate::context::MessageContext;
use crate::error::ConfigError;
use crate::filter::{self, CompiledGroup};
use crate::template;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Message types covered by each base event. `any` spans everything,
/// including lines parsed without a recognized type.
pub fn base_event_message_types(base: BaseEvent) -> &'static [&'static str] {
    match base {
        BaseEvent::Message => &["privmsg", "notice"],
        BaseEvent::Join => &["join"],
        BaseEvent::Part => &["part"],
        BaseEvent::Quit => &["quit"],
        BaseEvent::Nick => &["nick"],
        BaseEvent::Kick => &["kick"],
        BaseEvent::Mode => &["mode"],
        BaseEvent::Topic => &["topic"],
        BaseEvent::Connect | BaseEvent::Disconnect => &["system"],
        BaseEvent::Any => &[
            "privmsg", "notice", "join", "part", "quit", "nick", "kick", "mode", "topic",
            "system", "unknown",
        ],
    }
}

struct CompiledEvent {
    config: EventConfig,
    filters: Option<CompiledGroup>,
}

/// A compiled snapshot of events, servers, and sink states.
pub struct EventProcessor {
    events: Vec<CompiledEvent>,
    servers: Vec<ServerConfig>,
    sink_enabled: HashMap<String, bool>,
    client_enabled: HashMap<String, bool>,
}

impl EventProcessor {
    /// Snapshot the store. Disabled events are excluded up front; disabled
    /// servers and sinks stay in the tables so their state can veto
    /// delivery.
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let mut events = Vec::new();
        for event in store.events.values().filter(|e| e.enabled) {
            let filters = event
                .filters
                .as_ref()
                .map(|group| {
                    filter::compile(group).map_err(|source| ConfigError::Filter {
                        config_type: "event",
                        config_id: event.id.clone(),
                        source,
                    })
                })
                .transpose()?;
            events.push(CompiledEvent {
                config: event.clone(),
                filters,
            });
        }
        // Highest priority first; ties keep registry (id) order
        events.sort_by_key(|e| std::cmp::Reverse(e.config.priority.unwrap_or(0)));

        Ok(Self {
            events,
            servers: store.servers.values().cloned().collect(),
            sink_enabled: store
                .sinks
                .values()
                .map(|s| (s.id.clone(), s.enabled))
                .collect(),
            client_enabled: store
                .clients
                .values()
                .map(|c| (c.id.clone(), c.enabled))
                .collect(),
        })
    }

    /// Enrich the context and return every matching event, highest priority
    /// first, each paired with its own context copy. An empty result means
    /// the message matched nothing or was vetoed by a disabled component.
    pub fn process(&self, mut ctx: MessageContext) -> Vec<(EventConfig, MessageContext)> {
        if !self
            .client_enabled
            .get(&ctx.client.id)
            .copied()
            .unwrap_or(false)
        {
            debug!(client = %ctx.client.id, "dropping message from disabled client");
            return Vec::new();
        }

        if let Some(server) = self.match_server(&ctx) {
            if !server.enabled {
                debug!(server = %server.id, "dropping message for disabled server");
                return Vec::new();
            }
            enrich_from_server(&mut ctx, server);
        }

        let message_type = ctx.message_type().to_string();
        let mut matched = Vec::new();

        for event in &self.events {
            if !base_event_message_types(event.config.base_event).contains(&message_type.as_str())
            {
                continue;
            }
            if !server_id_matches(&event.config.server_ids, ctx.server.id.as_deref()) {
                continue;
            }

            // Each event evaluates against its own context copy so host
            // overrides stay local to that event's filters and templating.
            let mut event_ctx = ctx.clone();
            event_ctx.event = Some(crate::context::EventSummary {
                id: event.config.id.clone(),
                name: event.config.name.clone(),
                base_event: event.config.base_event,
                group: event.config.group.clone(),
            });
            apply_host_override(&mut event_ctx, &event.config);

            if let Some(filters) = &event.filters {
                if !filters.evaluate(&event_ctx.to_value()) {
                    continue;
                }
            }

            // Chain drop: a disabled sink anywhere in the route vetoes the
            // whole event rather than delivering partially.
            let disabled_sink = event
                .config
                .sink_ids
                .iter()
                .find(|id| !self.sink_enabled.get(*id).copied().unwrap_or(false));
            if let Some(sink_id) = disabled_sink {
                debug!(
                    event = %event.config.id,
                    sink = %sink_id,
                    "dropping event referencing disabled sink"
                );
                continue;
            }

            matched.push((event.config.clone(), event_ctx));
        }
        matched
    }

    /// Server match order: displayName against the path-derived identifier,
    /// then id (case-insensitive), then hostname against the discovered
    /// hostname.
    fn match_server(&self, ctx: &MessageContext) -> Option<&ServerConfig> {
        let identifier = ctx.metadata.get("serverIdentifier").and_then(Value::as_str);
        let hostname = ctx.metadata.get("serverHostname").and_then(Value::as_str);

        if let Some(identifier) = identifier {
            if let Some(server) = self
                .servers
                .iter()
                .find(|s| !s.display_name.is_empty() && s.display_name == identifier)
            {
                return Some(server);
            }
            if let Some(server) = self
                .servers
                .iter()
                .find(|s| s.id.eq_ignore_ascii_case(identifier))
            {
                return Some(server);
            }
        }
        if let Some(hostname) = hostname {
            return self.servers.iter().find(|s| s.hostname == hostname);
        }
        None
    }

    /// Number of enabled events in the snapshot.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

fn server_id_matches(server_ids: &[String], server_id: Option<&str>) -> bool {
    if server_ids.iter().any(|id| id == "*") {
        return true;
    }
    match server_id {
        Some(id) => server_ids.iter().any(|s| s == id),
        None => false,
    }
}

fn enrich_from_server(ctx: &mut MessageContext, server: &ServerConfig) {
    ctx.server.id = Some(server.id.clone());
    ctx.server.hostname = Some(server.hostname.clone());
    if !server.display_name.is_empty() {
        ctx.server.display_name = Some(server.display_name.clone());
    }
    if !server.client_nickname.is_empty() {
        ctx.server.client_nickname = Some(server.client_nickname.clone());
    }
    ctx.server.network = server.network.clone();
    ctx.server.port = server.port;
    for (key, value) in &server.metadata {
        ctx.server.metadata.insert(key.clone(), value.clone());
    }

    let nickname = ctx.sender.as_ref().map(|s| s.nickname.clone());
    if let Some(nickname) = nickname {
        if let Some(user) = server.users.get(&nickname) {
            if let Some(sender) = ctx.sender.as_mut() {
                if sender.realname.is_none() {
                    sender.realname = user.realname.clone();
                }
                if sender.modes.is_none() {
                    sender.modes = user.modes.clone();
                }
            }
            for (key, value) in &user.metadata {
                ctx.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge `event.metadata.host` into the context server, template-resolving
/// string values first.
fn apply_host_override(ctx: &mut MessageContext, event: &EventConfig) {
    let Some(Value::Object(overrides)) = event.metadata.get("host") else {
        return;
    };
    let scope = ctx.to_value();
    for (key, value) in overrides {
        let resolved = template::process_value(value, &scope);
        match key.as_str() {
            "hostname" => {
                if let Some(s) = resolved.as_str() {
                    ctx.server.hostname = Some(s.to_string());
                }
            }
            "displayName" => {
                if let Some(s) = resolved.as_str() {
                    ctx.server.display_name = Some(s.to_string());
                }
            }
            "network" => {
                if let Some(s) = resolved.as_str() {
                    ctx.server.network = Some(s.to_string());
                }
            }
            "clientNickname" => {
                if let Some(s) = resolved.as_str() {
                    ctx.server.client_nickname = Some(s.to_string());
                }
            }
            "port" => {
                if let Some(port) = resolved.as_u64() {
                    ctx.server.port = u16::try_from(port).ok();
                }
            }
            other => {
                ctx.server.metadata.insert(other.to_string(), resolved);
            }
        }
    }
}
