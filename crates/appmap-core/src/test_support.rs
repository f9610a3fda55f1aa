//! Trace fixtures shared by unit tests.

use serde_json::json;

use crate::appmap::AppMap;
use crate::builder::AppMapBuilder;
use crate::sequence::diagram::{Action, ActionKind, Actor, Diagram};

/// Parse, normalize and build.
pub fn fixture_appmap(trace: &str) -> AppMap {
    AppMapBuilder::source(trace.as_bytes())
        .unwrap()
        .normalize()
        .build()
}

/// Two root calls: `takeLeadership -> recover -> getTasks` on thread 1 and a
/// dynamically discovered `resign` on thread 2.
pub fn nested_function_trace() -> String {
    json!({
        "version": "1.9",
        "metadata": {
            "name": "Leader recovers assignments",
            "language": {"name": "java", "version": "17"},
            "recorder": {"name": "junit", "type": "tests"},
            "test_status": "succeeded"
        },
        "classMap": [{
            "type": "package", "name": "org",
            "children": [{
                "type": "package", "name": "book",
                "children": [
                    {"type": "class", "name": "Leader", "children": [
                        {"type": "function", "name": "takeLeadership", "static": false,
                         "location": "org/book/Leader.java:10"}
                    ]},
                    {"type": "class", "name": "RecoveredAssignments", "children": [
                        {"type": "function", "name": "recover", "static": false,
                         "location": "org/book/RecoveredAssignments.java:20",
                         "labels": ["recovery"]},
                        {"type": "function", "name": "getTasks", "static": false,
                         "location": "org/book/RecoveredAssignments.java:40"}
                    ]}
                ]
            }]
        }],
        "events": [
            {"id": 1, "event": "call", "thread_id": 1, "defined_class": "org.book.Leader",
             "method_id": "takeLeadership", "path": "org/book/Leader.java", "lineno": 10,
             "static": false,
             "receiver": {"class": "org.book.Leader", "object_id": 11, "value": "Leader@1"}},
            {"id": 2, "event": "call", "thread_id": 1,
             "defined_class": "org.book.RecoveredAssignments", "method_id": "recover",
             "static": false, "labels": ["zookeeper"],
             "receiver": {"class": "org.book.RecoveredAssignments", "object_id": 12,
                          "value": "RecoveredAssignments@2"}},
            {"id": 3, "event": "call", "thread_id": 1,
             "defined_class": "org.book.RecoveredAssignments", "method_id": "getTasks",
             "static": false},
            {"id": 4, "event": "return", "thread_id": 1, "parent_id": 3, "elapsed": 0.001,
             "return_value": {"class": "java.util.List", "object_id": 13, "value": "[]"}},
            {"id": 5, "event": "return", "thread_id": 1, "parent_id": 2, "elapsed": 0.002},
            {"id": 6, "event": "return", "thread_id": 1, "parent_id": 1, "elapsed": 0.003},
            {"id": 7, "event": "call", "thread_id": 2, "defined_class": "org.book.Leader",
             "method_id": "resign", "static": false},
            {"id": 8, "event": "return", "thread_id": 2, "elapsed": 0.0005}
        ]
    })
    .to_string()
}

/// One HTTP server request issuing one SQL query with the given literal.
pub fn http_sql_trace(literal: u64) -> String {
    noisy_http_sql_trace(literal, 1, 100, 0.01)
}

/// [`http_sql_trace`] with the volatile parts under the caller's control.
pub fn noisy_http_sql_trace(literal: u64, thread_id: u64, object_id: i64, elapsed: f64) -> String {
    json!({
        "version": "1.9",
        "metadata": {
            "name": "GET user",
            "recorder": {"name": "rspec", "type": "tests"},
            "git": {"repository": "git@example.com:app.git", "branch": "main",
                    "commit": "abc123", "status": "M app/models/user.rb"}
        },
        "classMap": [],
        "events": [
            {"id": 1, "event": "call", "thread_id": thread_id,
             "http_server_request": {"request_method": "GET",
                                     "path_info": format!("/users/{literal}"),
                                     "normalized_path_info": "/users/{id}"},
             "message": [{"name": "id", "class": "String", "value": literal.to_string(),
                          "object_id": object_id}]},
            {"id": 2, "event": "call", "thread_id": thread_id,
             "sql_query": {"sql": format!("SELECT * FROM users WHERE id = {literal}"),
                           "database_type": "sqlite"}},
            {"id": 3, "event": "return", "thread_id": thread_id, "parent_id": 2,
             "elapsed": elapsed},
            {"id": 4, "event": "return", "thread_id": thread_id, "parent_id": 1,
             "elapsed": elapsed * 2.0,
             "http_server_response": {"status": 200, "mime_type": "application/json"}}
        ]
    })
    .to_string()
}

/// A call tree of `width` root calls, each `depth` levels deep, for benches
/// and stress tests.
pub fn synthetic_trace(width: usize, depth: usize) -> String {
    let mut events = Vec::new();
    let mut id = 0u64;
    for root in 0..width {
        let mut open = Vec::new();
        for level in 0..depth {
            id += 1;
            open.push(id);
            events.push(json!({
                "id": id, "event": "call", "thread_id": 1,
                "defined_class": format!("app.Service{}", level % 7),
                "method_id": format!("step{}", (root + level) % 5),
                "static": level % 2 == 0
            }));
            if level % 3 == 2 {
                id += 1;
                events.push(json!({
                    "id": id, "event": "call", "thread_id": 1,
                    "sql_query": {"sql": format!("SELECT * FROM t{} WHERE id = {root}", level % 4)}
                }));
                id += 1;
                events.push(json!({"id": id, "event": "return", "thread_id": 1, "parent_id": id - 1}));
            }
        }
        while let Some(call) = open.pop() {
            id += 1;
            events.push(json!({"id": id, "event": "return", "thread_id": 1, "parent_id": call}));
        }
    }
    json!({"metadata": {"name": "synthetic"}, "classMap": [], "events": events}).to_string()
}

/// A hand-written function call for diagram tests.
pub struct Call {
    actor: &'static str,
    name: &'static str,
    children: Vec<Call>,
}

pub fn call(actor: &'static str, name: &'static str, children: Vec<Call>) -> Call {
    Call {
        actor,
        name,
        children,
    }
}

/// Diagram with one class actor per entry of `actors`, holding `calls`.
pub fn diagram_of(actors: &[&str], calls: Vec<Call>) -> Diagram {
    let mut diagram = Diagram::new(
        actors
            .iter()
            .enumerate()
            .map(|(order, name)| Actor {
                id: format!("class:{name}"),
                name: name.to_string(),
                order,
            })
            .collect(),
    );
    let mut stack: Vec<(Option<usize>, Call)> = calls.into_iter().rev().map(|c| (None, c)).collect();
    while let Some((parent, call)) = stack.pop() {
        let action = Action::new(
            ActionKind::Function,
            None,
            format!("class:{}", call.actor),
            call.name.to_string(),
        );
        let position = diagram.push(parent, action);
        stack.extend(call.children.into_iter().rev().map(|c| (Some(position), c)));
    }
    diagram
}
