//! Derived data-flow view.
//!
//! Computes the routing topology out of the registry: what each client
//! parses, which clients can see which servers (by matching server
//! hostnames against each enabled client's discovered hostnames), what each
//! event filters on, and the full client x server x sink routing paths with
//! their enable flags.

use crate::api::{ApiError, ApiState};
use crate::config::{FilterGroup, FilterNode, FilterOperator};
use crate::discovery::ServerCatalog;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Compact human-readable description of a filter tree.
fn summarize_filters(group: &FilterGroup) -> String {
    let operator = match group.operator {
        FilterOperator::And => "AND",
        FilterOperator::Or => "OR",
    };
    let parts: Vec<String> = group
        .filters
        .iter()
        .map(|node| match node {
            FilterNode::Group(inner) => summarize_filters(inner),
            FilterNode::Leaf(leaf) => {
                let operand = leaf
                    .value
                    .as_ref()
                    .map(|v| match v {
                        Value::String(s) => format!(" \"{}\"", s),
                        other => format!(" {}", other),
                    })
                    .or_else(|| leaf.pattern.as_ref().map(|p| format!(" /{}/", p)))
                    .unwrap_or_default();
                format!("{} {:?}{}", leaf.field, leaf.operator, operand)
            }
        })
        .collect();
    format!("{}({})", operator, parts.join(", "))
}

pub async fn data_flow(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let store = state.store.read().await;

    // Per-client discovered hostnames drive the server associations
    let mut client_hostnames: HashMap<String, Vec<String>> = HashMap::new();
    for client in store.clients.values().filter(|c| c.enabled) {
        let mut effective = client.clone();
        if effective.log_directory.is_none() {
            effective.log_directory = store.root.default_log_directory.clone();
        }
        let hostnames = ServerCatalog::discover(&effective)
            .map(|catalog| {
                catalog
                    .hostnames()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        client_hostnames.insert(client.id.clone(), hostnames);
    }

    let clients: Vec<Value> = store
        .clients
        .values()
        .map(|client| {
            let rules: Vec<Value> = client
                .parser_rules
                .iter()
                .map(|rule| {
                    json!({
                        "name": rule.name,
                        "messageType": rule.message_type,
                        "priority": rule.priority,
                        "skip": rule.skip,
                    })
                })
                .collect();
            json!({
                "id": client.id,
                "name": client.name,
                "enabled": client.enabled,
                "parserRules": rules,
            })
        })
        .collect();

    let servers: Vec<Value> = store
        .servers
        .values()
        .map(|server| {
            let associated: Vec<&String> = client_hostnames
                .iter()
                .filter(|(_, hostnames)| hostnames.iter().any(|h| h == &server.hostname))
                .map(|(client_id, _)| client_id)
                .collect();
            json!({
                "id": server.id,
                "hostname": server.hostname,
                "displayName": server.display_name,
                "enabled": server.enabled,
                "clients": associated,
            })
        })
        .collect();

    let events: Vec<Value> = store
        .events
        .values()
        .map(|event| {
            let target_servers: Vec<&crate::config::ServerConfig> =
                if event.server_ids.iter().any(|id| id == "*") {
                    store.servers.values().collect()
                } else {
                    event
                        .server_ids
                        .iter()
                        .filter_map(|id| store.servers.get(id))
                        .collect()
                };

            let mut routes = Vec::new();
            for client in store.clients.values() {
                for server in &target_servers {
                    for sink_id in &event.sink_ids {
                        let sink_enabled = store
                            .sinks
                            .get(sink_id)
                            .map(|s| s.enabled)
                            .unwrap_or(false);
                        routes.push(json!({
                            "clientId": client.id,
                            "serverId": server.id,
                            "sinkId": sink_id,
                            "active": client.enabled
                                && server.enabled
                                && event.enabled
                                && sink_enabled,
                        }));
                    }
                }
            }

            json!({
                "id": event.id,
                "name": event.name,
                "enabled": event.enabled,
                "baseEvent": event.base_event,
                "filters": event.filters.as_ref().map(summarize_filters),
                "routes": routes,
            })
        })
        .collect();

    Ok(Json(json!({
        "clients": clients,
        "servers": servers,
        "events": events,
    })))
}
