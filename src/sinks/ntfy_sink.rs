//! Ntfy sink: pushes the rendered body to an ntfy topic.
//!
//! The rendered title rides in the `Title` header along with optional
//! `Priority` and `Tags`, which events may override through their per-sink
//! metadata. Header values are stripped to printable ASCII before sending.

use crate::config::{EventConfig, SinkConfig};
use crate::context::MessageContext;
use crate::sinks::{sanitize_header_value, Notification, SinkDelivery};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub struct NtfySink {
    config: SinkConfig,
    url: String,
    client: reqwest::Client,
}

impl NtfySink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let endpoint = config
            .config_str("endpoint")
            .ok_or_else(|| anyhow!("ntfy sink '{}' is missing config.endpoint", config.id))?;
        let topic = config
            .config_str("topic")
            .ok_or_else(|| anyhow!("ntfy sink '{}' is missing config.topic", config.id))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            config: config.clone(),
            url: format!("{}/{}", endpoint.trim_end_matches('/'), topic),
            client,
        })
    }

    /// Headers for one delivery: Title from the rendered notification,
    /// Priority/Tags from event overrides falling back to the sink config,
    /// plus any extra headers configured on the sink.
    fn build_headers(&self, notification: &Notification, event: &EventConfig) -> Vec<(String, String)> {
        let overrides = event.sink_metadata(&self.config);
        let mut headers = vec![(
            "Title".to_string(),
            sanitize_header_value(&notification.title),
        )];

        let priority = overrides
            .get("priority")
            .or_else(|| self.config.config.get("priority"))
            .map(value_as_header);
        if let Some(priority) = priority {
            headers.push(("Priority".to_string(), sanitize_header_value(&priority)));
        }

        let tags = overrides
            .get("tags")
            .or_else(|| self.config.config.get("tags"))
            .map(value_as_header);
        if let Some(tags) = tags {
            headers.push(("Tags".to_string(), sanitize_header_value(&tags)));
        }

        if let Some(Value::Object(extra)) = self.config.config.get("headers") {
            for (name, value) in extra {
                headers.push((name.clone(), sanitize_header_value(&value_as_header(value))));
            }
        }
        headers
    }
}

/// Array values join with commas (ntfy tag lists), scalars use their
/// display form.
fn value_as_header(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[async_trait]
impl SinkDelivery for NtfySink {
    async fn deliver(
        &self,
        notification: &Notification,
        _ctx: &MessageContext,
        event: &EventConfig,
    ) -> Result<()> {
        let mut request = self.client.post(&self.url).body(notification.body.clone());
        for (name, value) in self.build_headers(notification, event) {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("ntfy request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("ntfy returned {}: {}", status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink(config: serde_json::Value) -> NtfySink {
        NtfySink::new(&serde_json::from_value(config).unwrap()).unwrap()
    }

    fn event(metadata: serde_json::Value) -> EventConfig {
        serde_json::from_value(json!({
            "id": "e", "baseEvent": "any", "metadata": metadata
        }))
        .unwrap()
    }

    #[test]
    fn test_url_joins_endpoint_and_topic() {
        let sink = sink(json!({
            "id": "push", "type": "ntfy",
            "config": {"endpoint": "https://ntfy.sh/", "topic": "irc-alerts"}
        }));
        assert_eq!(sink.url, "https://ntfy.sh/irc-alerts");
    }

    #[test]
    fn test_headers_with_overrides() {
        let sink = sink(json!({
            "id": "push", "type": "ntfy",
            "allowedMetadata": ["priority", "tags"],
            "config": {
                "endpoint": "https://ntfy.sh", "topic": "irc",
                "priority": "default", "tags": ["irc"],
                "headers": {"X-Extra": "yes"}
            }
        }));
        let notification = Notification {
            title: "Mention ünïcode".to_string(),
            body: "b".to_string(),
        };

        let headers = sink.build_headers(&notification, &event(json!({})));
        assert!(headers.contains(&("Priority".to_string(), "default".to_string())));
        assert!(headers.contains(&("Tags".to_string(), "irc".to_string())));
        assert!(headers.contains(&("X-Extra".to_string(), "yes".to_string())));
        // Non-ASCII stripped from the title header
        let title = &headers.iter().find(|(n, _)| n == "Title").unwrap().1;
        assert_eq!(title, "Mention ncode");

        let overridden = sink.build_headers(
            &notification,
            &event(json!({"sink": {"push": {"priority": "urgent", "tags": ["alert", "irc"]}}})),
        );
        assert!(overridden.contains(&("Priority".to_string(), "urgent".to_string())));
        assert!(overridden.contains(&("Tags".to_string(), "alert,irc".to_string())));
    }
}
