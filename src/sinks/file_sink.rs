//! File sink: appends (or overwrites) rendered notification lines.

use crate::config::{EventConfig, SinkConfig, TemplateFormat};
use crate::context::MessageContext;
use crate::sinks::{Notification, SinkDelivery};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub struct FileSink {
    path: PathBuf,
    overwrite: bool,
    format: TemplateFormat,
}

impl FileSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let path = config
            .config_str("path")
            .ok_or_else(|| anyhow!("file sink '{}' is missing config.path", config.id))?;
        Ok(Self {
            path: PathBuf::from(path),
            overwrite: config.config_str("mode") == Some("overwrite"),
            format: config
                .template
                .as_ref()
                .map(|t| t.format)
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl SinkDelivery for FileSink {
    async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    async fn deliver(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        _event: &EventConfig,
    ) -> Result<()> {
        let line = match self.format {
            TemplateFormat::Json => json!({
                "title": notification.title,
                "body": notification.body,
                "timestamp": ctx.timestamp.to_rfc3339(),
            })
            .to_string(),
            TemplateFormat::Text | TemplateFormat::Markdown => {
                format!("[{}] {}", notification.title, notification.body)
            }
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(!self.overwrite)
            .truncate(self.overwrite)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClientInfo;
    use tempfile::TempDir;

    fn context() -> MessageContext {
        MessageContext::for_client(ClientInfo::default())
    }

    fn event() -> EventConfig {
        serde_json::from_value(json!({"id": "e", "baseEvent": "any"})).unwrap()
    }

    #[tokio::test]
    async fn test_append_mode_accumulates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/notifications.log");
        let config: SinkConfig = serde_json::from_value(json!({
            "id": "f", "type": "file", "config": {"path": path}
        }))
        .unwrap();
        let sink = FileSink::new(&config).unwrap();
        sink.initialize().await.unwrap();

        for body in ["one", "two"] {
            sink.deliver(
                &Notification {
                    title: "t".to_string(),
                    body: body.to_string(),
                },
                &context(),
                &event(),
            )
            .await
            .unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[t] one\n[t] two\n");
    }

    #[tokio::test]
    async fn test_overwrite_mode_keeps_last() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("latest.txt");
        let config: SinkConfig = serde_json::from_value(json!({
            "id": "f", "type": "file",
            "config": {"path": path, "mode": "overwrite"}
        }))
        .unwrap();
        let sink = FileSink::new(&config).unwrap();

        for body in ["one", "two"] {
            sink.deliver(
                &Notification {
                    title: "t".to_string(),
                    body: body.to_string(),
                },
                &context(),
                &event(),
            )
            .await
            .unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[t] two\n");
    }
}
