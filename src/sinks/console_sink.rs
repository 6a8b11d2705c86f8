//! Console sink: prints notifications to stdout for debugging setups.

use crate::config::{EventConfig, SinkConfig, TemplateFormat};
use crate::context::MessageContext;
use crate::sinks::{Notification, SinkDelivery};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct ConsoleSink {
    format: TemplateFormat,
}

impl ConsoleSink {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            format: config
                .template
                .as_ref()
                .map(|t| t.format)
                .unwrap_or_default(),
        }
    }

    fn format_line(&self, notification: &Notification, ctx: &MessageContext) -> String {
        match self.format {
            TemplateFormat::Json => json!({
                "title": notification.title,
                "body": notification.body,
                "timestamp": ctx.timestamp.to_rfc3339(),
                "client": ctx.client.id,
                "server": ctx.server.id,
            })
            .to_string(),
            TemplateFormat::Text | TemplateFormat::Markdown => {
                format!("[{}] {}", notification.title, notification.body)
            }
        }
    }
}

#[async_trait]
impl SinkDelivery for ConsoleSink {
    async fn deliver(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        _event: &EventConfig,
    ) -> Result<()> {
        println!("{}", self.format_line(notification, ctx));
        Ok(())
    }
}
