//! Order-insensitive canonical forms: sorted, de-duplicated lists.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::appmap::AppMap;
use crate::canonicalize::is_blacklisted;
use crate::event::{EventRef, EventType};
use crate::sql::{analyze_query, obfuscate};

/// Collect one value per surviving call into a sorted set. Values are keyed
/// by their JSON text so that objects sort deterministically.
fn collect(appmap: &AppMap, mut pick: impl FnMut(&EventRef<'_>) -> Vec<Value>) -> Vec<Value> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut values: Vec<(String, Value)> = Vec::new();
    for event in appmap.events() {
        if !event.is_call() || is_blacklisted(&event.labels()) {
            continue;
        }
        for value in pick(&event) {
            let key = value.to_string();
            if seen.insert(key.clone()) {
                values.push((key, value));
            }
        }
    }
    values.sort_by(|a, b| a.0.cmp(&b.0));
    values.into_iter().map(|(_, v)| v).collect()
}

pub fn sql_normalized(appmap: &AppMap) -> Vec<Value> {
    collect(appmap, |event| match event.sql_query() {
        Some(sql) => vec![json!(obfuscate(sql, event.database_type()))],
        None => Vec::new(),
    })
}

/// Table names referenced by any query.
pub fn sql_tables(appmap: &AppMap) -> Vec<Value> {
    collect(appmap, |event| {
        event
            .sql_query()
            .and_then(analyze_query)
            .map(|analysis| analysis.tables.into_iter().map(Value::String).collect())
            .unwrap_or_default()
    })
}

fn http_request(event: &EventRef<'_>) -> Vec<Value> {
    let mut record = json!({"route": event.route()});
    if let Some(status) = event.status_code() {
        record["status"] = json!(status);
    }
    vec![record]
}

pub fn http_server_requests(appmap: &AppMap) -> Vec<Value> {
    collect(appmap, |event| {
        if event.event_type() == EventType::HttpServerRequest {
            http_request(event)
        } else {
            Vec::new()
        }
    })
}

pub fn http_client_requests(appmap: &AppMap) -> Vec<Value> {
    collect(appmap, |event| {
        if event.event_type() == EventType::HttpClientRequest {
            http_request(event)
        } else {
            Vec::new()
        }
    })
}

pub fn labels(appmap: &AppMap) -> Vec<Value> {
    collect(appmap, |event| {
        event.labels().into_iter().map(Value::String).collect()
    })
}
