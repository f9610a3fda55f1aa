//! Canonical forms of a built trace, used for fingerprinting and comparison.
//!
//! Each algorithm reduces the call tree to the data it cares about and
//! renders it as JSON with sorted keys. Output depends only on the trace: the
//! same input always yields byte-identical text.
//!
//! Ordered forms keep the call tree flat in memory and are written with an
//! explicit stack, so arbitrarily deep traces canonicalize without
//! recursion.

pub mod ordered;
pub mod unique;

use std::fmt;

use serde_json::Value;

use crate::appmap::AppMap;
use crate::errors::{AppMapError, AppMapResult};
use crate::models::sha256_hex;

pub use ordered::{CanonicalNode, CanonicalTree};

/// Labels of instrumentation that only adds noise (serializers, session
/// reads). Events carrying them are left out of every canonical form.
pub const BLACKLISTED_LABELS: &[&str] = &[
    "format.json.generate",
    "format.yaml.generate",
    "http.session.read",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// Ordered tree of SQL, HTTP and labelled function calls.
    Info,
    /// Ordered tree of every call.
    Trace,
    SqlNormalized,
    SqlTables,
    HttpServerRequests,
    HttpClientRequests,
    Labels,
}

impl Algorithm {
    pub const ALL: [Algorithm; 7] = [
        Algorithm::Info,
        Algorithm::Trace,
        Algorithm::SqlNormalized,
        Algorithm::SqlTables,
        Algorithm::HttpServerRequests,
        Algorithm::HttpClientRequests,
        Algorithm::Labels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Trace => "trace",
            Self::SqlNormalized => "sqlNormalized",
            Self::SqlTables => "sqlTables",
            Self::HttpServerRequests => "httpServerRequests",
            Self::HttpClientRequests => "httpClientRequests",
            Self::Labels => "labels",
        }
    }

    pub fn parse(name: &str) -> AppMapResult<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == name)
            .ok_or_else(|| AppMapError::UnknownAlgorithm(name.to_string()))
    }

    pub fn apply(&self, appmap: &AppMap) -> Canonical {
        match self {
            Self::Info => Canonical::Tree(ordered::info(appmap)),
            Self::Trace => Canonical::Tree(ordered::trace(appmap)),
            Self::SqlNormalized => Canonical::List(unique::sql_normalized(appmap)),
            Self::SqlTables => Canonical::List(unique::sql_tables(appmap)),
            Self::HttpServerRequests => Canonical::List(unique::http_server_requests(appmap)),
            Self::HttpClientRequests => Canonical::List(unique::http_client_requests(appmap)),
            Self::Labels => Canonical::List(unique::labels(appmap)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one algorithm.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    /// Ordered call tree.
    Tree(CanonicalTree),
    /// Sorted, de-duplicated entries.
    List(Vec<Value>),
}

impl Canonical {
    /// Compact JSON text. Object keys come out sorted.
    pub fn to_json(&self) -> AppMapResult<String> {
        match self {
            Self::Tree(tree) => tree.to_json(),
            Self::List(values) => Ok(serde_json::to_string(values)?),
        }
    }

    /// SHA-256 of [`Canonical::to_json`].
    pub fn digest(&self) -> AppMapResult<String> {
        Ok(sha256_hex(self.to_json()?))
    }
}

/// Names of every registered algorithm.
pub fn algorithms() -> Vec<&'static str> {
    Algorithm::ALL.iter().map(Algorithm::as_str).collect()
}

/// Canonical form of `appmap` under the named algorithm.
pub fn canonicalize(name: &str, appmap: &AppMap) -> AppMapResult<Canonical> {
    Ok(Algorithm::parse(name)?.apply(appmap))
}

pub(crate) fn is_blacklisted(labels: &std::collections::BTreeSet<String>) -> bool {
    labels
        .iter()
        .any(|label| BLACKLISTED_LABELS.contains(&label.as_str()))
}
