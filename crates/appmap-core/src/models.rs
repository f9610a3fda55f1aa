//! Raw trace models shared by the builder, the fingerprinter and the differ.
//!
//! These types mirror the AppMap JSON document one-to-one. Keys this crate
//! does not interpret are kept in a flattened `extra` map so that a trace
//! survives a parse/serialize round trip without losing data recorded by
//! newer agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Unrecognised keys carried through untouched.
pub type Extra = BTreeMap<String, Value>;

/// Digest algorithm name recorded in every [`Fingerprint`].
pub const FINGERPRINT_ALGORITHM: &str = "sha256";

/// Compute a lowercase SHA-256 hex digest.
pub fn sha256_hex(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_ref());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A parsed trace document: `{version, metadata, classMap, events}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMapData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(rename = "classMap", default)]
    pub class_map: Vec<ClassMapEntry>,
    #[serde(default)]
    pub events: Vec<EventData>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl AppMapData {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Client>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorder: Option<Recorder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_failure: Option<TestFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprints: Vec<Fingerprint>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Metadata {
    /// Whether this trace was recorded by a test-case recorder.
    pub fn is_test(&self) -> bool {
        self.recorder
            .as_ref()
            .and_then(|r| r.kind.as_deref())
            .map(|kind| kind == "tests")
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recorder {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `git.status` is a list of porcelain lines; older agents wrote one string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GitStatus {
    Lines(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Git {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GitStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `{appmap_digest, canonicalization_algorithm, digest, fingerprint_algorithm}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub appmap_digest: String,
    pub canonicalization_algorithm: String,
    pub digest: String,
    pub fingerprint_algorithm: String,
}

// ---------------------------------------------------------------------------
// Class map
// ---------------------------------------------------------------------------

/// One node of the `classMap` forest as it appears on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMapEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ClassMapEntry>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Call,
    Return,
}

/// A captured value: parameter, receiver, message entry or return value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionObject {
    #[serde(default)]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpServerRequest {
    #[serde(default)]
    pub request_method: String,
    #[serde(default)]
    pub path_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_path_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpClientRequest {
    #[serde(default)]
    pub request_method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Shared by `http_server_response` and `http_client_response`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Legacy spelling of `status_code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl HttpResponse {
    pub fn status(&self) -> Option<u16> {
        self.status_code.or(self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    #[serde(default)]
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One record of the flat `events` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub id: u64,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defined_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<ParameterObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Vec<ParameterObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_server_request: Option<HttpServerRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_server_response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_client_request: Option<HttpClientRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_client_response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<SqlQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<ParameterObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<Vec<ExceptionObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl EventData {
    /// A bare record of the given kind; fields are filled in by the caller.
    pub fn new(id: u64, event: EventKind) -> Self {
        Self {
            id,
            event,
            thread_id: None,
            parent_id: None,
            defined_class: None,
            method_id: None,
            path: None,
            lineno: None,
            is_static: None,
            receiver: None,
            parameters: None,
            message: None,
            labels: None,
            http_server_request: None,
            http_server_response: None,
            http_client_request: None,
            http_client_response: None,
            sql_query: None,
            return_value: None,
            exceptions: None,
            elapsed: None,
            extra: Extra::new(),
        }
    }

    pub fn is_call(&self) -> bool {
        self.event == EventKind::Call
    }

    pub fn is_return(&self) -> bool {
        self.event == EventKind::Return
    }

    pub fn thread(&self) -> u64 {
        self.thread_id.unwrap_or(0)
    }

    /// `defined_class` with package dots turned into path separators.
    pub fn defined_class_path(&self) -> Option<String> {
        self.defined_class.as_ref().map(|c| c.replace('.', "/"))
    }

    /// `Class#method` or `Class.method`, matching function code object ids.
    pub fn function_id(&self) -> Option<String> {
        let class = self.defined_class_path()?;
        let method = self.method_id.as_deref()?;
        let separator = if self.is_static.unwrap_or(false) { '.' } else { '#' };
        Some(format!("{class}{separator}{method}"))
    }
}
