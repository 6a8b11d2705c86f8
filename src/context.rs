//! Message context
//!
//! The runtime record flowing through the pipeline. A context is created by
//! the parser from a raw log line, enriched by the event processor with
//! server and user details, borrowed by sinks for templating, and then
//! dropped. Serialization uses the same camelCase key names the config files
//! use, so template paths like `{{server.displayName}}` and filter fields
//! like `target.type` resolve against [`MessageContext::to_value`].

use crate::config::{BaseEvent, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The raw line as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawLine {
    pub line: String,
    /// The unparsed timestamp capture, when a rule extracted one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_string: Option<String>,
}

/// The parsed message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
}

/// Who sent the message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Channel,
    Query,
    Console,
}

/// Where the message was seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
}

/// The client adapter that produced this context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub client_type: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Server identity, filled in progressively by discovery and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nickname: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Summary of the matched event, attached for downstream templating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub base_event: BaseEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// The record flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub raw: RawLine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,
    pub client: ClientInfo,
    #[serde(default)]
    pub server: ServerContext,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSummary>,
}

impl MessageContext {
    /// An empty context carrying only the client identity. The watcher's
    /// path extraction and the parser fill in the rest.
    pub fn for_client(client: ClientInfo) -> Self {
        Self {
            raw: RawLine::default(),
            message: None,
            sender: None,
            target: None,
            client,
            server: ServerContext::default(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
            event: None,
        }
    }

    /// JSON projection used by the template and filter engines.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The underlying message type, or "unknown" when no message was parsed.
    pub fn message_type(&self) -> &str {
        self.message
            .as_ref()
            .map(|m| m.message_type.as_str())
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template;
    use serde_json::json;

    fn sample() -> MessageContext {
        let mut ctx = MessageContext::for_client(ClientInfo {
            id: "weechat".to_string(),
            client_type: "text".to_string(),
            name: "WeeChat".to_string(),
            metadata: Metadata::new(),
        });
        ctx.raw.line = "[12:00:05] <bob> hi amallin".to_string();
        ctx.message = Some(MessageInfo {
            content: "hi amallin".to_string(),
            message_type: "privmsg".to_string(),
        });
        ctx.sender = Some(SenderInfo {
            nickname: "bob".to_string(),
            ..Default::default()
        });
        ctx.target = Some(TargetInfo {
            name: "#rust".to_string(),
            target_type: TargetType::Channel,
        });
        ctx.server.display_name = Some("Libera".to_string());
        ctx
    }

    #[test]
    fn test_projection_uses_camel_case_paths() {
        let value = sample().to_value();
        assert_eq!(
            template::resolve_path(&value, "server.displayName"),
            Some(&json!("Libera"))
        );
        assert_eq!(
            template::resolve_path(&value, "message.type"),
            Some(&json!("privmsg"))
        );
        assert_eq!(
            template::resolve_path(&value, "target.type"),
            Some(&json!("channel"))
        );
        assert_eq!(
            template::resolve_path(&value, "client.id"),
            Some(&json!("weechat"))
        );
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let mut ctx = sample();
        ctx.sender = None;
        let value = ctx.to_value();
        assert!(template::resolve_path(&value, "sender.nickname").is_none());
    }

    #[test]
    fn test_message_type_fallback() {
        let mut ctx = sample();
        assert_eq!(ctx.message_type(), "privmsg");
        ctx.message = None;
        assert_eq!(ctx.message_type(), "unknown");
    }
}
