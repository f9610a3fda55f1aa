//! Call/return events and the read-only views computed over them.
//!
//! Events are stored flat, in emission order, inside the built [`AppMap`].
//! Tree links (`parent`, `children`, the call/return `linked` pair and the
//! code object binding) are indices into that storage. [`EventRef`] pairs an
//! index with its owning map and carries every derived accessor.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use crate::appmap::AppMap;
use crate::code_object::CodeObject;
use crate::models::{
    sha256_hex, EventData, ExceptionObject, HttpClientRequest, HttpResponse, HttpServerRequest,
    ParameterObject, SqlQuery,
};
use crate::sql::{analyze_query, obfuscate};

/// Semantic category of a call, decided by which payload it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Function,
    Sql,
    HttpServerRequest,
    HttpClientRequest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Sql => "sql",
            Self::HttpServerRequest => "http_server_request",
            Self::HttpClientRequest => "http_client_request",
        }
    }

    pub fn of(data: &EventData) -> Self {
        if data.http_server_request.is_some() {
            Self::HttpServerRequest
        } else if data.http_client_request.is_some() {
            Self::HttpClientRequest
        } else if data.sql_query.is_some() {
            Self::Sql
        } else {
            Self::Function
        }
    }
}

/// Storage record for one event.
#[derive(Debug)]
pub struct Event {
    pub(crate) data: EventData,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) linked: Option<usize>,
    pub(crate) code_object: Option<usize>,
    pub(crate) data_references: Vec<usize>,
    pub(crate) depth: usize,
    hash: OnceLock<String>,
    identity_hash: OnceLock<String>,
}

impl Event {
    pub fn new(data: EventData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
            linked: None,
            code_object: None,
            data_references: Vec::new(),
            depth: 0,
            hash: OnceLock::new(),
            identity_hash: OnceLock::new(),
        }
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn linked(&self) -> Option<usize> {
        self.linked
    }
}

/// Pair a call with its return. The first link wins: if either side is
/// already linked, nothing changes and `false` is returned.
pub fn link(events: &mut [Event], call: usize, ret: usize) -> bool {
    if call == ret || events[call].linked.is_some() || events[ret].linked.is_some() {
        return false;
    }
    events[call].linked = Some(ret);
    events[ret].linked = Some(call);
    true
}

/// Borrowed handle on one event of a built [`AppMap`].
#[derive(Clone, Copy)]
pub struct EventRef<'a> {
    appmap: &'a AppMap,
    index: usize,
}

impl<'a> EventRef<'a> {
    pub(crate) fn new(appmap: &'a AppMap, index: usize) -> Self {
        Self { appmap, index }
    }

    fn event(&self) -> &'a Event {
        &self.appmap.events[self.index]
    }

    fn at(&self, index: usize) -> EventRef<'a> {
        EventRef::new(self.appmap, index)
    }

    /// Position in the flat emission-ordered sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &'a EventData {
        &self.event().data
    }

    pub fn id(&self) -> u64 {
        self.data().id
    }

    pub fn fqid(&self) -> String {
        format!("event:{}", self.id())
    }

    pub fn thread_id(&self) -> u64 {
        self.data().thread()
    }

    pub fn is_call(&self) -> bool {
        self.data().is_call()
    }

    pub fn is_return(&self) -> bool {
        self.data().is_return()
    }

    pub fn linked_event(&self) -> Option<EventRef<'a>> {
        self.event().linked.map(|i| self.at(i))
    }

    pub fn call_event(&self) -> Option<EventRef<'a>> {
        if self.is_call() {
            Some(*self)
        } else {
            self.linked_event()
        }
    }

    pub fn return_event(&self) -> Option<EventRef<'a>> {
        if self.is_return() {
            Some(*self)
        } else {
            self.linked_event()
        }
    }

    pub fn next(&self) -> Option<EventRef<'a>> {
        let next = self.index + 1;
        (next < self.appmap.events.len()).then(|| self.at(next))
    }

    pub fn previous(&self) -> Option<EventRef<'a>> {
        self.index.checked_sub(1).map(|i| self.at(i))
    }

    /// Enclosing call; for a return, the enclosing call of its call.
    pub fn parent(&self) -> Option<EventRef<'a>> {
        self.event().parent.map(|i| self.at(i))
    }

    pub fn children(&self) -> Vec<EventRef<'a>> {
        self.event().children.iter().map(|&i| self.at(i)).collect()
    }

    /// Number of enclosing calls; root calls have depth 0.
    pub fn depth(&self) -> usize {
        self.event().depth
    }

    pub fn event_type(&self) -> EventType {
        EventType::of(self.call_event().unwrap_or(*self).data())
    }

    pub fn code_object_index(&self) -> Option<usize> {
        self.call_event().and_then(|c| c.event().code_object)
    }

    pub fn code_object(&self) -> Option<&'a CodeObject> {
        self.code_object_index()
            .map(|i| self.appmap.class_map().get(i))
    }

    /// Returns that produced the objects this call receives.
    pub fn data_references(&self) -> Vec<EventRef<'a>> {
        self.event().data_references.iter().map(|&i| self.at(i)).collect()
    }

    pub fn method_id(&self) -> Option<&'a str> {
        self.call_data().and_then(|d| d.method_id.as_deref())
    }

    pub fn is_static(&self) -> bool {
        self.call_data().and_then(|d| d.is_static).unwrap_or(false)
    }

    /// `defined_class` with package dots written as `/`.
    pub fn defined_class(&self) -> Option<String> {
        self.call_data().and_then(|d| d.defined_class_path())
    }

    fn call_data(&self) -> Option<&'a EventData> {
        self.call_event().map(|c| c.data())
    }

    fn return_data(&self) -> Option<&'a EventData> {
        self.return_event().map(|r| r.data())
    }

    pub fn parameters(&self) -> &'a [ParameterObject] {
        self.call_data()
            .and_then(|d| d.parameters.as_deref())
            .unwrap_or(&[])
    }

    pub fn message(&self) -> &'a [ParameterObject] {
        self.call_data()
            .and_then(|d| d.message.as_deref())
            .unwrap_or(&[])
    }

    pub fn receiver(&self) -> Option<&'a ParameterObject> {
        self.call_data().and_then(|d| d.receiver.as_ref())
    }

    pub fn return_value(&self) -> Option<&'a ParameterObject> {
        self.return_data().and_then(|d| d.return_value.as_ref())
    }

    pub fn exceptions(&self) -> &'a [ExceptionObject] {
        self.return_data()
            .and_then(|d| d.exceptions.as_deref())
            .unwrap_or(&[])
    }

    pub fn elapsed(&self) -> Option<f64> {
        self.return_data().and_then(|d| d.elapsed)
    }

    pub fn http_server_request(&self) -> Option<&'a HttpServerRequest> {
        self.call_data().and_then(|d| d.http_server_request.as_ref())
    }

    pub fn http_server_response(&self) -> Option<&'a HttpResponse> {
        self.return_data().and_then(|d| d.http_server_response.as_ref())
    }

    pub fn http_client_request(&self) -> Option<&'a HttpClientRequest> {
        self.call_data().and_then(|d| d.http_client_request.as_ref())
    }

    pub fn http_client_response(&self) -> Option<&'a HttpResponse> {
        self.return_data().and_then(|d| d.http_client_response.as_ref())
    }

    /// Response status of an HTTP server or client call.
    pub fn status_code(&self) -> Option<u16> {
        self.http_server_response()
            .or_else(|| self.http_client_response())
            .and_then(HttpResponse::status)
    }

    pub fn sql(&self) -> Option<&'a SqlQuery> {
        self.call_data().and_then(|d| d.sql_query.as_ref())
    }

    /// Normalized SQL text when the agent recorded one, else the raw text.
    pub fn sql_query(&self) -> Option<&'a str> {
        self.sql()
            .map(|q| q.normalized_sql.as_deref().unwrap_or(&q.sql))
    }

    pub fn database_type(&self) -> Option<&'a str> {
        self.sql().and_then(|q| q.database_type.as_deref())
    }

    pub fn request_path(&self) -> Option<&'a str> {
        if let Some(request) = self.http_server_request() {
            return Some(
                request
                    .normalized_path_info
                    .as_deref()
                    .unwrap_or(&request.path_info),
            );
        }
        self.http_client_request().map(|r| r.url.as_str())
    }

    pub fn request_method(&self) -> Option<&'a str> {
        if let Some(request) = self.http_server_request() {
            return Some(&request.request_method);
        }
        self.http_client_request().map(|r| r.request_method.as_str())
    }

    /// `"<METHOD> <path>"` for HTTP events.
    pub fn route(&self) -> Option<String> {
        let method = self.request_method().filter(|m| !m.is_empty())?;
        let path = self.request_path().filter(|p| !p.is_empty())?;
        Some(format!("{method} {path}"))
    }

    /// Event labels together with the labels of the bound code object.
    pub fn labels(&self) -> BTreeSet<String> {
        let mut labels: BTreeSet<String> = self
            .call_data()
            .and_then(|d| d.labels.as_ref())
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(code_object) = self.code_object() {
            labels.extend(code_object.labels().iter().cloned());
        }
        labels
    }

    /// Enclosing calls from the direct parent up to the root.
    pub fn ancestors(&self) -> Vec<EventRef<'a>> {
        let mut result = Vec::new();
        let mut current = self.call_event().and_then(|c| c.parent());
        while let Some(event) = current {
            result.push(event);
            current = event.parent();
        }
        result
    }

    /// Root-to-self chain of calls.
    pub fn call_stack(&self) -> Vec<EventRef<'a>> {
        let mut stack = self.ancestors();
        stack.reverse();
        if let Some(call) = self.call_event() {
            stack.push(call);
        }
        stack
    }

    /// Every nested call, depth first.
    pub fn descendants(&self) -> Vec<EventRef<'a>> {
        let mut result = Vec::new();
        let mut stack: Vec<usize> = self.event().children.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            result.push(self.at(index));
            stack.extend(self.appmap.events[index].children.iter().rev());
        }
        result
    }

    fn sibling_position(&self) -> Option<(&'a [usize], usize)> {
        let parent = self.event().parent?;
        let siblings = &self.appmap.events[parent].children;
        let position = siblings.iter().position(|&i| i == self.index)?;
        Some((siblings.as_slice(), position))
    }

    pub fn previous_sibling(&self) -> Option<EventRef<'a>> {
        let (siblings, position) = self.sibling_position()?;
        position.checked_sub(1).map(|p| self.at(siblings[p]))
    }

    /// Next call at the same nesting level. Root calls look ahead through
    /// the flat sequence for the next parentless call.
    pub fn next_sibling(&self) -> Option<EventRef<'a>> {
        if self.event().parent.is_none() {
            let events = &self.appmap.events;
            return (self.index + 1..events.len())
                .find(|&i| events[i].data.is_call() && events[i].parent.is_none())
                .map(|i| self.at(i));
        }
        let (siblings, position) = self.sibling_position()?;
        siblings.get(position + 1).map(|&i| self.at(i))
    }

    /// Walk the flat sequence from this event up to its next sibling,
    /// calling `on_enter` for calls and `on_exit` for returns.
    pub fn traverse(
        &self,
        mut on_enter: impl FnMut(EventRef<'a>),
        mut on_exit: impl FnMut(EventRef<'a>),
    ) {
        let boundary = self
            .next_sibling()
            .map(|e| e.index)
            .unwrap_or(self.appmap.events.len());
        for index in self.index..boundary {
            let event = self.at(index);
            if event.is_call() {
                on_enter(event);
            } else {
                on_exit(event);
            }
        }
    }

    /// Parameters, message entries and the return value.
    pub fn data_objects(&self) -> Vec<&'a ParameterObject> {
        self.parameters()
            .iter()
            .chain(self.message())
            .chain(self.return_value())
            .collect()
    }

    fn function_identity(&self) -> String {
        match self.code_object() {
            Some(code_object) => code_object.id().to_string(),
            None => self
                .call_data()
                .and_then(|d| d.function_id())
                .unwrap_or_default(),
        }
    }

    /// Properties that identify what was called, ignoring how it went.
    pub fn identity_properties(&self) -> Value {
        let event_type = self.event_type();
        let mut properties = Map::new();
        properties.insert("event_type".into(), json!(event_type.as_str()));
        match event_type {
            EventType::Function => {
                properties.insert("id".into(), json!(self.function_identity()));
            }
            EventType::Sql => {
                let sql = self.sql_query().unwrap_or_default();
                match analyze_query(sql) {
                    Some(analysis) => {
                        properties.insert("actions".into(), json!(analysis.actions));
                        properties.insert("tables".into(), json!(analysis.tables));
                    }
                    None => {
                        properties.insert(
                            "sql_normalized".into(),
                            json!(obfuscate(sql, self.database_type())),
                        );
                    }
                }
            }
            EventType::HttpServerRequest | EventType::HttpClientRequest => {
                properties.insert("route".into(), json!(self.route()));
            }
        }
        Value::Object(properties)
    }

    /// Properties that stay the same across runs of the same code path:
    /// no timestamps, object ids, thread ids or raw parameter values.
    pub fn stable_properties(&self) -> Value {
        let event_type = self.event_type();
        let mut properties = Map::new();
        properties.insert("event_type".into(), json!(event_type.as_str()));
        match event_type {
            EventType::Function => {
                properties.insert("id".into(), json!(self.function_identity()));
                let exceptions = self.exceptions();
                properties.insert("raises_exception".into(), json!(!exceptions.is_empty()));
                if !exceptions.is_empty() {
                    let classes: Vec<&str> = exceptions.iter().map(|e| e.class.as_str()).collect();
                    properties.insert("exceptions".into(), json!(classes));
                }
            }
            EventType::Sql => {
                let sql = self.sql_query().unwrap_or_default();
                properties.insert(
                    "sql_normalized".into(),
                    json!(obfuscate(sql, self.database_type())),
                );
            }
            EventType::HttpServerRequest | EventType::HttpClientRequest => {
                properties.insert("route".into(), json!(self.route()));
                if let Some(status) = self.status_code() {
                    properties.insert("status_code".into(), json!(status));
                }
            }
        }
        Value::Object(properties)
    }

    /// SHA-256 of [`Self::stable_properties`], computed once.
    pub fn hash(&self) -> &'a str {
        self.event()
            .hash
            .get_or_init(|| sha256_hex(self.stable_properties().to_string()))
    }

    /// SHA-256 of [`Self::identity_properties`], computed once.
    pub fn identity_hash(&self) -> &'a str {
        self.event()
            .identity_hash
            .get_or_init(|| sha256_hex(self.identity_properties().to_string()))
    }
}

impl fmt::Display for EventRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sql) = self.sql_query() {
            return f.write_str(sql);
        }
        if let Some(route) = self.route() {
            return f.write_str(&route);
        }
        let separator = if self.is_static() { '.' } else { '#' };
        write!(
            f,
            "{}{separator}{}",
            self.defined_class().unwrap_or_default(),
            self.method_id().unwrap_or_default()
        )
    }
}

impl fmt::Debug for EventRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRef")
            .field("index", &self.index)
            .field("id", &self.id())
            .field("event", &self.data().event)
            .finish()
    }
}

impl PartialEq for EventRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.appmap, other.appmap) && self.index == other.index
    }
}

impl Eq for EventRef<'_> {}
