//! Line parsing
//!
//! Each client carries an ordered list of regex rules. For every log line
//! the rules are tried in descending priority; the first match wins. A rule
//! either discards the line (`skip`) or deposits its named captures into the
//! canonical slots of a [`MessageContext`]. Unknown capture keys spill into
//! the context metadata so client-specific details survive to templating.
//!
//! The adapter also owns path extraction: regexes over the log file path
//! that recover the server identifier and the channel/query/console target
//! before any line content is inspected.

use crate::config::{ClientConfig, ParserRule};
use crate::context::{
    ClientInfo, MessageContext, MessageInfo, SenderInfo, TargetInfo, TargetType,
};
use crate::discovery::ServerCatalog;
use crate::error::ConfigError;
use crate::filter::compile_regex;
use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A parser rule with its regex compiled.
struct CompiledRule {
    rule: ParserRule,
    regex: Regex,
}

/// Compiled path-extraction regexes.
#[derive(Default)]
struct CompiledPathExtraction {
    server: Option<(Regex, usize)>,
    channel: Option<(Regex, usize)>,
    query: Option<(Regex, usize)>,
    console: Option<Regex>,
}

/// A client's parsing machinery: compiled rules in priority order plus
/// compiled path extraction.
pub struct ClientAdapter {
    config: ClientConfig,
    rules: Vec<CompiledRule>,
    paths: CompiledPathExtraction,
}

impl ClientAdapter {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.parser_rules.len());
        for rule in &config.parser_rules {
            let regex = compile_regex(&rule.pattern, &rule.flags).map_err(|source| {
                ConfigError::InvalidRegex {
                    config_type: "client",
                    config_id: config.id.clone(),
                    field: format!("parserRules[{}].pattern", rule.name),
                    source,
                }
            })?;
            rules.push(CompiledRule {
                rule: rule.clone(),
                regex,
            });
        }
        // Higher priority first; equal priorities keep config order
        rules.sort_by_key(|r| std::cmp::Reverse(r.rule.priority));

        let extraction = &config.discovery.path_extraction;
        let paths = CompiledPathExtraction {
            server: compile_extraction(
                extraction.server_pattern.as_deref(),
                extraction.server_group,
                &config.id,
            )?,
            channel: compile_extraction(
                extraction.channel_pattern.as_deref(),
                extraction.channel_group,
                &config.id,
            )?,
            query: compile_extraction(
                extraction.query_pattern.as_deref(),
                extraction.query_group,
                &config.id,
            )?,
            console: compile_extraction(extraction.console_pattern.as_deref(), 0, &config.id)?
                .map(|(regex, _)| regex),
        };

        Ok(Self {
            config,
            rules,
            paths,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.config.id.clone(),
            client_type: self.config.client_type.clone(),
            name: self.config.name.clone(),
            metadata: self.config.metadata.clone(),
        }
    }

    /// Build the path-derived partial context for one log file: client
    /// identity, extracted server identifier, resolved hostname (when the
    /// discovery catalog knows the file or identifier), and the target.
    pub fn partial_context(&self, path: &Path, catalog: Option<&ServerCatalog>) -> MessageContext {
        let mut ctx = MessageContext::for_client(self.client_info());
        let path_str = path.to_string_lossy();

        if let Some((regex, group)) = &self.paths.server {
            if let Some(captures) = regex.captures(&path_str) {
                if let Some(m) = captures.get(*group) {
                    ctx.metadata.insert(
                        "serverIdentifier".to_string(),
                        Value::String(m.as_str().to_string()),
                    );
                }
            }
        }

        let identifier = ctx
            .metadata
            .get("serverIdentifier")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(catalog) = catalog {
            let hostname = identifier
                .as_deref()
                .and_then(|ident| catalog.hostname_for_identifier(ident))
                .or_else(|| catalog.hostname_for_path(path));
            if let Some(hostname) = hostname {
                ctx.metadata.insert(
                    "serverHostname".to_string(),
                    Value::String(hostname.to_string()),
                );
            }
        }

        ctx.target = self.extract_target(&path_str);
        ctx
    }

    /// Console, then channel, then query, in that order.
    fn extract_target(&self, path: &str) -> Option<TargetInfo> {
        if let Some(console) = &self.paths.console {
            if console.is_match(path) {
                return Some(TargetInfo {
                    name: "console".to_string(),
                    target_type: TargetType::Console,
                });
            }
        }
        if let Some((regex, group)) = &self.paths.channel {
            if let Some(captures) = regex.captures(path) {
                if let Some(m) = captures.get(*group) {
                    return Some(TargetInfo {
                        name: m.as_str().to_string(),
                        target_type: TargetType::Channel,
                    });
                }
            }
        }
        if let Some((regex, group)) = &self.paths.query {
            if let Some(captures) = regex.captures(path) {
                if let Some(m) = captures.get(*group) {
                    return Some(TargetInfo {
                        name: m.as_str().to_string(),
                        target_type: TargetType::Query,
                    });
                }
            }
        }
        None
    }

    /// Parse one line. Returns `None` for blank lines, lines matched by a
    /// `skip` rule, and lines no rule matches.
    pub fn parse_line(&self, line: &str, partial: &MessageContext) -> Option<MessageContext> {
        if line.trim().is_empty() {
            return None;
        }

        let (rule, captures) = self
            .rules
            .iter()
            .find_map(|r| r.regex.captures(line).map(|c| (&r.rule, c)))?;

        if rule.skip {
            return None;
        }

        let mut ctx = partial.clone();
        ctx.raw.line = line.to_string();
        ctx.timestamp = Utc::now();

        for (semantic, group_name) in &rule.captures {
            let Some(text) = captures.name(group_name).map(|m| m.as_str().to_string()) else {
                continue;
            };
            match semantic.as_str() {
                "timestamp" => {
                    if let Some(parsed) = parse_timestamp(&text) {
                        ctx.timestamp = parsed;
                    } else {
                        debug!(client = %self.config.id, value = %text, "unparseable timestamp, using now");
                    }
                    ctx.raw.timestamp_string = Some(text);
                }
                "nickname" => sender_mut(&mut ctx).nickname = text,
                "username" => sender_mut(&mut ctx).username = Some(text),
                "hostname" => sender_mut(&mut ctx).hostname = Some(text),
                "content" => {
                    let message_type = rule
                        .message_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    ctx.message = Some(MessageInfo {
                        content: text,
                        message_type,
                    });
                }
                "target" => match &mut ctx.target {
                    Some(target) => target.name = text,
                    None => {
                        ctx.target = Some(TargetInfo {
                            name: text,
                            target_type: TargetType::Channel,
                        });
                    }
                },
                other => {
                    ctx.metadata.insert(other.to_string(), Value::String(text));
                }
            }
        }

        if ctx.message.is_none() {
            if let Some(message_type) = &rule.message_type {
                ctx.message = Some(MessageInfo {
                    content: line.to_string(),
                    message_type: message_type.clone(),
                });
            }
        }

        Some(ctx)
    }
}

fn compile_extraction(
    pattern: Option<&str>,
    group: usize,
    client_id: &str,
) -> Result<Option<(Regex, usize)>, ConfigError> {
    pattern
        .map(|p| {
            compile_regex(p, "")
                .map(|regex| (regex, group))
                .map_err(|source| ConfigError::InvalidRegex {
                    config_type: "client",
                    config_id: client_id.to_string(),
                    field: "discovery.pathExtraction".to_string(),
                    source,
                })
        })
        .transpose()
}

fn sender_mut(ctx: &mut MessageContext) -> &mut SenderInfo {
    ctx.sender.get_or_insert_with(SenderInfo::default)
}

/// Parse the timestamp formats IRC clients commonly write. Time-only forms
/// are anchored to today's date.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Utc.from_local_datetime(&naive).single();
        }
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(text, format) {
            let today = Utc::now();
            let date =
                chrono::NaiveDate::from_ymd_opt(today.year(), today.month(), today.day())?;
            return Utc.from_local_datetime(&date.and_time(time)).single();
        }
    }
    None
}
