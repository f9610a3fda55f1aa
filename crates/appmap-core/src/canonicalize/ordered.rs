//! Order-preserving canonical trees (`info` and `trace`).

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::appmap::AppMap;
use crate::canonicalize::is_blacklisted;
use crate::errors::AppMapResult;
use crate::event::{EventRef, EventType};
use crate::sql::obfuscate;

const CHILDREN: &str = "children";

/// One simplified call. `id`, `parent_id` and `depth` come from the trace
/// event and are not part of the canonical text.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalNode {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub depth: usize,
    /// Position of the nearest surviving ancestor.
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub payload: BTreeMap<String, Value>,
}

/// Surviving calls stored flat. A parent always precedes its children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalTree {
    nodes: Vec<CanonicalNode>,
    roots: Vec<usize>,
}

enum Step {
    Open(usize),
    Close(usize),
}

/// Comma before every array element and object entry but the first.
fn separate(out: &mut String) {
    if !matches!(out.chars().last(), Some('{' | '[')) {
        out.push(',');
    }
}

fn write_entry(out: &mut String, key: &str, value: &Value) -> AppMapResult<()> {
    separate(out);
    out.push_str(&serde_json::to_string(key)?);
    out.push(':');
    out.push_str(&serde_json::to_string(value)?);
    Ok(())
}

impl CanonicalTree {
    pub fn nodes(&self) -> &[CanonicalNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compact JSON: an array of records, each holding its payload and,
    /// when it has any, a `children` array. Keys are sorted. The text is
    /// written with an explicit stack, so nesting depth is unbounded.
    pub fn to_json(&self) -> AppMapResult<String> {
        let mut out = String::from("[");
        let mut stack: Vec<Step> = self.roots.iter().rev().map(|&r| Step::Open(r)).collect();
        while let Some(step) = stack.pop() {
            match step {
                Step::Open(position) => {
                    let node = &self.nodes[position];
                    separate(&mut out);
                    out.push('{');
                    if node.children.is_empty() {
                        for (key, value) in &node.payload {
                            write_entry(&mut out, key, value)?;
                        }
                        out.push('}');
                        continue;
                    }
                    for (key, value) in node.payload.iter().filter(|(k, _)| k.as_str() < CHILDREN) {
                        write_entry(&mut out, key, value)?;
                    }
                    separate(&mut out);
                    out.push_str("\"children\":[");
                    stack.push(Step::Close(position));
                    stack.extend(node.children.iter().rev().map(|&c| Step::Open(c)));
                }
                Step::Close(position) => {
                    out.push(']');
                    let node = &self.nodes[position];
                    for (key, value) in node.payload.iter().filter(|(k, _)| k.as_str() > CHILDREN) {
                        write_entry(&mut out, key, value)?;
                    }
                    out.push('}');
                }
            }
        }
        out.push(']');
        Ok(out)
    }
}

/// Type-tagged record for a call, shared by both ordered algorithms.
fn base_payload(event: &EventRef<'_>) -> BTreeMap<String, Value> {
    let mut payload = BTreeMap::new();
    match event.event_type() {
        EventType::Sql => {
            payload.insert(
                "sql".to_string(),
                json!(obfuscate(
                    event.sql_query().unwrap_or_default(),
                    event.database_type()
                )),
            );
        }
        EventType::HttpServerRequest | EventType::HttpClientRequest => {
            payload.insert("route".to_string(), json!(event.route()));
            let mut names: Vec<&str> = event
                .message()
                .iter()
                .filter_map(|m| m.name.as_deref())
                .collect();
            names.sort_unstable();
            names.dedup();
            if !names.is_empty() {
                payload.insert("parameters".to_string(), json!(names));
            }
            if let Some(status) = event.status_code() {
                payload.insert("status".to_string(), json!(status));
            }
        }
        EventType::Function => {
            let fqid = event
                .code_object()
                .map(|c| c.fqid())
                .unwrap_or_else(|| format!("function:{}", event.data().function_id().unwrap_or_default()));
            payload.insert("function".to_string(), json!(fqid));
        }
    }
    payload
}

/// Replay the call events, keep those `transform` accepts and re-link
/// survivors to their nearest surviving ancestor. Calls with a blacklisted
/// label are always dropped.
pub fn build_tree(
    appmap: &AppMap,
    mut transform: impl FnMut(&EventRef<'_>) -> Option<BTreeMap<String, Value>>,
) -> CanonicalTree {
    let mut surviving: Vec<Option<usize>> = vec![None; appmap.len()];
    let mut tree = CanonicalTree::default();

    for event in appmap.events() {
        if !event.is_call() {
            continue;
        }
        let inherited = event.parent().and_then(|p| surviving[p.index()]);
        let payload = if is_blacklisted(&event.labels()) {
            None
        } else {
            transform(&event)
        };
        let Some(payload) = payload else {
            surviving[event.index()] = inherited;
            continue;
        };
        let position = tree.nodes.len();
        let parent_id = inherited.map(|p| tree.nodes[p].id);
        match inherited {
            Some(parent) => tree.nodes[parent].children.push(position),
            None => tree.roots.push(position),
        }
        tree.nodes.push(CanonicalNode {
            id: event.id(),
            parent_id,
            depth: event.depth(),
            parent: inherited,
            children: Vec::new(),
            payload,
        });
        surviving[event.index()] = Some(position);
    }
    tree
}

/// SQL, HTTP and labelled function calls, in call order. Function records
/// carry their sorted labels.
pub fn info(appmap: &AppMap) -> CanonicalTree {
    build_tree(appmap, |event| {
        let mut payload = base_payload(event);
        if event.event_type() == EventType::Function {
            let labels = event.labels();
            if labels.is_empty() {
                return None;
            }
            payload.insert("labels".to_string(), json!(labels));
        }
        Some(payload)
    })
}

/// Every call, in call order.
pub fn trace(appmap: &AppMap) -> CanonicalTree {
    build_tree(appmap, |event| Some(base_payload(event)))
}
