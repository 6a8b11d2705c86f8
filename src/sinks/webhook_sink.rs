//! Webhook sink
//!
//! Builds an outgoing HTTP request from the sink's payload transform
//! pipeline. Transforms are tried in descending priority; one is selected
//! when the event's per-sink metadata names it explicitly, when its
//! condition filter evaluates true, or when it is the first unconditional
//! transform reached (the catch-all). Without any transforms the sink posts
//! a compact JSON summary.
//!
//! The transform template scope exposes `{{title}}`, `{{body}}`,
//! `{{context.*}}`, `{{event.*}}`, `{{metadata.*}}` (the merged per-sink
//! overrides), `{{config.*}}`, and the fields of the sink's own template so
//! transforms can reference the defaults they replace.

use crate::config::{BodyFormat, EventConfig, HeaderValue, PayloadTransform, SinkConfig};
use crate::context::MessageContext;
use crate::filter::{self, CompiledGroup};
use crate::sinks::{sanitize_header_value, Notification, SinkDelivery};
use crate::template;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

struct CompiledTransform {
    transform: PayloadTransform,
    condition: Option<CompiledGroup>,
}

/// One planned HTTP request, separated from execution for testability.
#[derive(Debug, PartialEq)]
pub(crate) struct RequestPlan {
    pub method: String,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub struct WebhookSink {
    config: SinkConfig,
    url: String,
    transforms: Vec<CompiledTransform>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let url = config
            .config_str("url")
            .ok_or_else(|| anyhow!("webhook sink '{}' is missing config.url", config.id))?
            .to_string();

        let mut transforms = Vec::new();
        for transform in config.payload_transforms.clone().unwrap_or_default() {
            let condition = transform
                .condition
                .as_ref()
                .map(filter::compile)
                .transpose()
                .with_context(|| {
                    format!(
                        "invalid condition in transform '{}' of sink '{}'",
                        transform.name, config.id
                    )
                })?;
            transforms.push(CompiledTransform {
                transform,
                condition,
            });
        }
        transforms.sort_by_key(|t| std::cmp::Reverse(t.transform.priority));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            config: config.clone(),
            url,
            transforms,
            client,
        })
    }

    /// Template scope for transform rendering and condition evaluation.
    fn build_scope(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        event: &EventConfig,
    ) -> Value {
        let mut scope = Map::new();
        if let Some(template) = &self.config.template {
            if let Ok(Value::Object(fields)) = serde_json::to_value(template) {
                for (key, value) in fields {
                    scope.insert(key, value);
                }
            }
        }
        scope.insert("title".to_string(), Value::String(notification.title.clone()));
        scope.insert("body".to_string(), Value::String(notification.body.clone()));
        scope.insert("context".to_string(), ctx.to_value());
        scope.insert(
            "event".to_string(),
            serde_json::to_value(event).unwrap_or_default(),
        );
        scope.insert(
            "metadata".to_string(),
            Value::Object(event.sink_metadata(&self.config)),
        );
        scope.insert("config".to_string(), Value::Object(self.config.config.clone()));
        Value::Object(scope)
    }

    fn select_transform(&self, scope: &Value, event: &EventConfig) -> Option<&CompiledTransform> {
        let overrides = event.sink_metadata(&self.config);
        if let Some(name) = overrides.get("transform").and_then(Value::as_str) {
            return self.transforms.iter().find(|t| t.transform.name == name);
        }
        self.transforms.iter().find(|t| match &t.condition {
            Some(condition) => condition.evaluate(scope),
            None => true,
        })
    }

    pub(crate) fn plan(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        event: &EventConfig,
    ) -> Result<RequestPlan> {
        let scope = self.build_scope(notification, ctx, event);

        let Some(selected) = self.select_transform(&scope, event) else {
            // No transforms configured (or none selected): compact summary
            let body = json!({
                "title": notification.title,
                "body": notification.body,
                "timestamp": ctx.timestamp.to_rfc3339(),
                "event": {"id": event.id, "name": event.name},
            });
            return Ok(RequestPlan {
                method: "POST".to_string(),
                content_type: "application/json".to_string(),
                headers: Vec::new(),
                body: serde_json::to_vec(&body)?,
            });
        };
        let transform = &selected.transform;

        let (body, default_content_type) = match transform.body_format {
            BodyFormat::Json => {
                let template = transform
                    .json_template
                    .as_ref()
                    .ok_or_else(|| anyhow!("transform '{}' has no jsonTemplate", transform.name))?;
                let rendered = template::process_value(template, &scope);
                (serde_json::to_vec(&rendered)?, "application/json")
            }
            BodyFormat::Text => {
                let template = transform
                    .text_template
                    .as_ref()
                    .ok_or_else(|| anyhow!("transform '{}' has no textTemplate", transform.name))?;
                (
                    template::process(template, &scope).into_bytes(),
                    "text/plain",
                )
            }
            BodyFormat::Form => {
                let template = transform
                    .form_template
                    .as_ref()
                    .ok_or_else(|| anyhow!("transform '{}' has no formTemplate", transform.name))?;
                let mut pairs: Vec<(String, String)> = template
                    .iter()
                    .map(|(key, value)| (key.clone(), template::process(value, &scope)))
                    .collect();
                pairs.sort();
                let encoded = pairs
                    .iter()
                    .map(|(key, value)| {
                        format!(
                            "{}={}",
                            urlencoding::encode(key),
                            urlencoding::encode(value)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                (encoded.into_bytes(), "application/x-www-form-urlencoded")
            }
            BodyFormat::Custom => {
                let payload = event
                    .sink_metadata(&self.config)
                    .get("payload")
                    .cloned()
                    .ok_or_else(|| {
                        anyhow!(
                            "transform '{}' expects event metadata to supply a payload",
                            transform.name
                        )
                    })?;
                let bytes = match payload {
                    Value::String(s) => template::process(&s, &scope).into_bytes(),
                    other => serde_json::to_vec(&template::process_value(&other, &scope))?,
                };
                (bytes, "application/octet-stream")
            }
        };

        let mut headers = Vec::new();
        if let Some(configured) = &transform.headers {
            let mut names: Vec<&String> = configured.keys().collect();
            names.sort();
            for name in names {
                let rendered = match &configured[name] {
                    HeaderValue::Literal(value) => value.clone(),
                    HeaderValue::Template { template: t } => template::process(t, &scope),
                };
                headers.push((name.clone(), sanitize_header_value(&rendered)));
            }
        }

        Ok(RequestPlan {
            method: transform
                .method
                .clone()
                .unwrap_or_else(|| "POST".to_string()),
            content_type: transform
                .content_type
                .clone()
                .unwrap_or_else(|| default_content_type.to_string()),
            headers,
            body,
        })
    }
}

#[async_trait]
impl SinkDelivery for WebhookSink {
    async fn deliver(
        &self,
        notification: &Notification,
        ctx: &MessageContext,
        event: &EventConfig,
    ) -> Result<()> {
        let plan = self.plan(notification, ctx, event)?;
        let method = reqwest::Method::from_bytes(plan.method.as_bytes())
            .unwrap_or(reqwest::Method::POST);

        let mut request = self
            .client
            .request(method, &self.url)
            .header("Content-Type", &plan.content_type)
            .body(plan.body);
        for (name, value) in &plan.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("webhook request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("webhook returned {}: {}", status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ClientInfo, MessageInfo};

    fn context() -> MessageContext {
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
        ctx.target = Some(crate::context::TargetInfo {
            name: "#rust".to_string(),
            target_type: crate::context::TargetType::Channel,
        });
        ctx
    }

    fn notification() -> Notification {
        Notification {
            title: "Mention".to_string(),
            body: "hi amallin".to_string(),
        }
    }

    fn event(metadata: Value) -> EventConfig {
        serde_json::from_value(json!({
            "id": "mention", "name": "Mention", "baseEvent": "message",
            "metadata": metadata
        }))
        .unwrap()
    }

    fn sink(config: Value) -> WebhookSink {
        WebhookSink::new(&serde_json::from_value(config).unwrap()).unwrap()
    }

    #[test]
    fn test_default_plan_without_transforms() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com/hook"}
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        assert_eq!(plan.method, "POST");
        assert_eq!(plan.content_type, "application/json");
        let body: Value = serde_json::from_slice(&plan.body).unwrap();
        assert_eq!(body["title"], "Mention");
        assert_eq!(body["event"]["id"], "mention");
    }

    #[test]
    fn test_condition_selects_transform_by_priority() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "payloadTransforms": [
                {"name": "fallback", "bodyFormat": "text", "textTemplate": "fallback: {{body}}",
                 "priority": 0},
                {"name": "channels", "bodyFormat": "text",
                 "textTemplate": "in {{context.target.name}}: {{body}}",
                 "condition": {"operator": "AND", "filters": [
                     {"field": "context.target.type", "operator": "equals", "value": "channel"}
                 ]},
                 "priority": 10}
            ]
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        assert_eq!(
            String::from_utf8(plan.body).unwrap(),
            "in #rust: hi amallin"
        );

        // Query messages fall through to the unconditional transform
        let mut ctx = context();
        ctx.target = Some(crate::context::TargetInfo {
            name: "alice".to_string(),
            target_type: crate::context::TargetType::Query,
        });
        let plan = sink.plan(&notification(), &ctx, &event(json!({}))).unwrap();
        assert_eq!(
            String::from_utf8(plan.body).unwrap(),
            "fallback: hi amallin"
        );
    }

    #[test]
    fn test_explicit_transform_from_event_metadata() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "allowedMetadata": ["transform"],
            "payloadTransforms": [
                {"name": "a", "bodyFormat": "text", "textTemplate": "A", "priority": 10},
                {"name": "b", "bodyFormat": "text", "textTemplate": "B"}
            ]
        }));
        let plan = sink
            .plan(
                &notification(),
                &context(),
                &event(json!({"sink": {"hook": {"transform": "b"}}})),
            )
            .unwrap();
        assert_eq!(String::from_utf8(plan.body).unwrap(), "B");
    }

    #[test]
    fn test_json_transform_preserves_structure() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "payloadTransforms": [
                {"name": "discord", "bodyFormat": "json",
                 "jsonTemplate": {
                     "content": "**{{title}}**\n{{body}}",
                     "embeds": [{"footer": "{{context.client.name}}", "count": 1}]
                 }}
            ]
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        let body: Value = serde_json::from_slice(&plan.body).unwrap();
        assert_eq!(body["content"], "**Mention**\nhi amallin");
        assert_eq!(body["embeds"][0]["footer"], "WeeChat");
        assert_eq!(body["embeds"][0]["count"], 1);
    }

    #[test]
    fn test_form_transform_url_encodes() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "payloadTransforms": [
                {"name": "form", "bodyFormat": "form",
                 "formTemplate": {"msg": "{{body}}", "chan": "{{context.target.name}}"}}
            ]
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        assert_eq!(plan.content_type, "application/x-www-form-urlencoded");
        assert_eq!(
            String::from_utf8(plan.body).unwrap(),
            "chan=%23rust&msg=hi%20amallin"
        );
    }

    #[test]
    fn test_custom_body_from_event_payload() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "payloadTransforms": [
                {"name": "raw", "bodyFormat": "custom", "contentType": "text/csv"}
            ]
        }));
        let plan = sink
            .plan(
                &notification(),
                &context(),
                &event(json!({"sink": {"hook": {"payload": "{{title}},{{body}}"}}})),
            )
            .unwrap();
        assert_eq!(plan.content_type, "text/csv");
        assert_eq!(String::from_utf8(plan.body).unwrap(), "Mention,hi amallin");

        // Without a supplied payload the custom transform is an error
        assert!(sink
            .plan(&notification(), &context(), &event(json!({})))
            .is_err());
    }

    #[test]
    fn test_headers_rendered_and_sanitized() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "payloadTransforms": [
                {"name": "t", "bodyFormat": "text", "textTemplate": "x",
                 "method": "PUT",
                 "headers": {
                     "X-Event": {"template": "{{event.name}} ü"},
                     "X-Static": "literal"
                 }}
            ]
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        assert_eq!(plan.method, "PUT");
        assert!(plan
            .headers
            .contains(&("X-Event".to_string(), "Mention ".to_string())));
        assert!(plan
            .headers
            .contains(&("X-Static".to_string(), "literal".to_string())));
    }

    #[test]
    fn test_template_fields_visible_to_transforms() {
        let sink = sink(json!({
            "id": "hook", "type": "webhook", "config": {"url": "https://example.com"},
            "template": {"title": "default title", "body": "default body"},
            "payloadTransforms": [
                {"name": "t", "bodyFormat": "text",
                 "textTemplate": "rendered={{title}} raw-default={{format}}"}
            ]
        }));
        let plan = sink
            .plan(&notification(), &context(), &event(json!({})))
            .unwrap();
        // {{title}} is the rendered title; template fields like format are
        // still reachable for transforms that want the configured defaults
        assert_eq!(
            String::from_utf8(plan.body).unwrap(),
            "rendered=Mention raw-default=text"
        );
    }
}
