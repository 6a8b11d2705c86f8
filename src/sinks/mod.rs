//! Notification sinks
//!
//! A sink is a delivery adapter behind a common capability set:
//! `initialize`, `deliver`, `destroy`. The [`SinkHandle`] wrapper owns the
//! cross-cutting behavior every sink shares: sliding-window rate limiting
//! and per-send title/body templating, with per-event overrides taking
//! precedence over the sink's own template and the built-in defaults.
//!
//! Rate-limit state is in memory only; counters reset when the process
//! restarts.

mod console_sink;
mod file_sink;
mod ntfy_sink;
mod webhook_sink;

pub use console_sink::ConsoleSink;
pub use file_sink::FileSink;
pub use ntfy_sink::NtfySink;
pub use webhook_sink::WebhookSink;

use crate::config::{EventConfig, RateLimitConfig, SinkConfig, SinkType};
use crate::context::MessageContext;
use crate::template;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_TITLE_TEMPLATE: &str = "{{event.name}}";
const DEFAULT_BODY_TEMPLATE: &str = "{{message.content}}";

/// The rendered notification handed to a delivery adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Delivery capability implemented per sink type.
#[async_trait]
pub trait SinkDelivery: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn deliver(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        event: &EventConfig,
    ) -> Result<()>;

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// What happened to a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    RateLimited,
}

/// Sliding-window timestamps of recent deliveries.
#[derive(Debug, Default)]
pub struct RateLimiter {
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn allow(&mut self, limits: &RateLimitConfig) -> bool {
        self.allow_at(limits, Instant::now())
    }

    fn allow_at(&mut self, limits: &RateLimitConfig, now: Instant) -> bool {
        let hour = Duration::from_secs(3600);
        let minute = Duration::from_secs(60);
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) >= hour {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if let Some(max_per_hour) = limits.max_per_hour {
            if self.timestamps.len() >= max_per_hour as usize {
                return false;
            }
        }
        if let Some(max_per_minute) = limits.max_per_minute {
            let last_minute = self
                .timestamps
                .iter()
                .rev()
                .take_while(|t| now.duration_since(**t) < minute)
                .count();
            if last_minute >= max_per_minute as usize {
                return false;
            }
        }
        self.timestamps.push_back(now);
        true
    }
}

/// A configured sink: shared behavior plus its delivery adapter.
pub struct SinkHandle {
    config: SinkConfig,
    limiter: Mutex<RateLimiter>,
    delivery: Box<dyn SinkDelivery>,
}

impl SinkHandle {
    /// Build the delivery adapter for a sink config. `custom` sinks are
    /// accepted by the schema but have no adapter; they log and drop.
    pub fn create(config: SinkConfig) -> Result<Self> {
        let delivery: Box<dyn SinkDelivery> = match config.sink_type {
            SinkType::Console => Box::new(ConsoleSink::new(&config)),
            SinkType::File => Box::new(FileSink::new(&config)?),
            SinkType::Ntfy => Box::new(NtfySink::new(&config)?),
            SinkType::Webhook => Box::new(WebhookSink::new(&config)?),
            SinkType::Custom => {
                warn!(sink = %config.id, "custom sink type has no adapter; deliveries are dropped");
                Box::new(NullSink)
            }
        };
        Ok(Self::with_delivery(config, delivery))
    }

    pub fn with_delivery(config: SinkConfig, delivery: Box<dyn SinkDelivery>) -> Self {
        Self {
            config,
            limiter: Mutex::new(RateLimiter::default()),
            delivery,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub async fn initialize(&self) -> Result<()> {
        self.delivery.initialize().await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.delivery.destroy().await
    }

    /// Rate-limit, render, and deliver one notification.
    pub async fn send(&self, ctx: &MessageContext, event: &EventConfig) -> Result<SendOutcome> {
        if let Some(limits) = &self.config.rate_limit {
            let allowed = self
                .limiter
                .lock()
                .expect("rate limiter poisoned")
                .allow(limits);
            if !allowed {
                info!(sink = %self.config.id, event = %event.id, "delivery skipped by rate limit");
                return Ok(SendOutcome::RateLimited);
            }
        }

        let notification = self.render(ctx, event);
        debug!(sink = %self.config.id, title = %notification.title, "delivering notification");
        self.delivery.deliver(&notification, ctx, event).await?;
        Ok(SendOutcome::Delivered)
    }

    /// Title/body resolution: per-event sink override, then the sink's own
    /// template, then the built-in defaults; all rendered against the
    /// enriched context.
    fn render(&self, ctx: &MessageContext, event: &EventConfig) -> Notification {
        let overrides = event.sink_metadata(&self.config);
        let template = self.config.template.clone().unwrap_or_default();

        let title_template = overrides
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(template.title)
            .unwrap_or_else(|| DEFAULT_TITLE_TEMPLATE.to_string());
        let body_template = overrides
            .get("body")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(template.body)
            .unwrap_or_else(|| DEFAULT_BODY_TEMPLATE.to_string());

        let scope = ctx.to_value();
        Notification {
            title: template::process(&title_template, &scope),
            body: template::process(&body_template, &scope),
        }
    }
}

/// Adapter for reserved sink types: accepts and drops.
struct NullSink;

#[async_trait]
impl SinkDelivery for NullSink {
    async fn deliver(
        &self,
        _notification: &Notification,
        _ctx: &MessageContext,
        event: &EventConfig,
    ) -> Result<()> {
        debug!(event = %event.id, "null sink dropped notification");
        Ok(())
    }
}

/// Strip characters that cannot appear in an HTTP header value.
pub(crate) fn sanitize_header_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::context::{ClientInfo, MessageContext, MessageInfo};
    use serde_json::json;

    fn sample_context() -> MessageContext {
        let mut ctx = MessageContext::for_client(ClientInfo {
            id: "weechat".to_string(),
            client_type: "text".to_string(),
            name: "WeeChat".to_string(),
            metadata: Default::default(),
        });
        ctx.message = Some(MessageInfo {
            content: "hi amallin".to_string(),
            message_type: "privmsg".to_string(),
        });
        ctx.server.display_name = Some("Libera".to_string());
        ctx.event = Some(crate::context::EventSummary {
            id: "mention".to_string(),
            name: "Mention".to_string(),
            base_event: crate::config::BaseEvent::Message,
            group: None,
        });
        ctx
    }

    fn event(metadata: serde_json::Value) -> EventConfig {
        serde_json::from_value(json!({
            "id": "mention",
            "name": "Mention",
            "baseEvent": "message",
            "sinkIds": ["console"],
            "metadata": metadata
        }))
        .unwrap()
    }

    fn handle(config: serde_json::Value) -> (SinkHandle, std::sync::Arc<Mutex<Vec<Notification>>>) {
        let config: SinkConfig = serde_json::from_value(config).unwrap();
        let (sink, delivered) = RecordingSink::new();
        (SinkHandle::with_delivery(config, Box::new(sink)), delivered)
    }

    #[tokio::test]
    async fn test_default_templates() {
        let (handle, delivered) = handle(json!({"id": "console", "type": "console"}));
        handle
            .send(&sample_context(), &event(json!({})))
            .await
            .unwrap();
        let notes = delivered.lock().unwrap();
        assert_eq!(notes[0].title, "Mention");
        assert_eq!(notes[0].body, "hi amallin");
    }

    #[tokio::test]
    async fn test_sink_template_over_defaults() {
        let (handle, delivered) = handle(json!({
            "id": "console",
            "type": "console",
            "template": {"title": "[{{server.displayName}}]", "body": "-> {{message.content}}"}
        }));
        handle
            .send(&sample_context(), &event(json!({})))
            .await
            .unwrap();
        let notes = delivered.lock().unwrap();
        assert_eq!(notes[0].title, "[Libera]");
        assert_eq!(notes[0].body, "-> hi amallin");
    }

    #[tokio::test]
    async fn test_event_override_wins_when_allowed() {
        let (handle, delivered) = handle(json!({
            "id": "console",
            "type": "console",
            "allowedMetadata": ["title"],
            "template": {"title": "sink title", "body": "sink body"}
        }));
        let event = event(json!({
            "sink": {"console": {"title": "event title", "body": "event body"}}
        }));
        handle.send(&sample_context(), &event).await.unwrap();
        let notes = delivered.lock().unwrap();
        // title is allowed, body override is filtered out
        assert_eq!(notes[0].title, "event title");
        assert_eq!(notes[0].body, "sink body");
    }

    #[tokio::test]
    async fn test_rate_limit_minute_window() {
        let (handle, delivered) = handle(json!({
            "id": "console",
            "type": "console",
            "rateLimit": {"maxPerMinute": 2}
        }));
        let ctx = sample_context();
        let event = event(json!({}));
        assert_eq!(
            handle.send(&ctx, &event).await.unwrap(),
            SendOutcome::Delivered
        );
        assert_eq!(
            handle.send(&ctx, &event).await.unwrap(),
            SendOutcome::Delivered
        );
        assert_eq!(
            handle.send(&ctx, &event).await.unwrap(),
            SendOutcome::RateLimited
        );
        assert_eq!(delivered.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_rate_limiter_windows() {
        let mut limiter = RateLimiter::default();
        let limits: RateLimitConfig =
            serde_json::from_value(json!({"maxPerMinute": 2, "maxPerHour": 3})).unwrap();
        let start = Instant::now();

        assert!(limiter.allow_at(&limits, start));
        assert!(limiter.allow_at(&limits, start + Duration::from_secs(1)));
        // Minute window is full
        assert!(!limiter.allow_at(&limits, start + Duration::from_secs(2)));
        // A minute later the minute window has drained
        assert!(limiter.allow_at(&limits, start + Duration::from_secs(70)));
        // Hour window is now full
        assert!(!limiter.allow_at(&limits, start + Duration::from_secs(140)));
        // Much later everything has drained
        assert!(limiter.allow_at(&limits, start + Duration::from_secs(3700)));
    }

    #[test]
    fn test_sanitize_header_value() {
        assert_eq!(sanitize_header_value("plain ascii"), "plain ascii");
        assert_eq!(sanitize_header_value("smörgåsbord"), "smrgsbord");
        assert_eq!(sanitize_header_value("line\nbreak"), "linebreak");
    }
}
