//! Change report between two indexed trace directories.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::canonicalize::Algorithm;
use crate::errors::AppMapResult;
use crate::models::Metadata;

/// Digest of one indexed trace under a single algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDigest {
    pub digest: String,
    pub is_test: bool,
}

/// Trace names, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Digests recorded in every index below `dir`, keyed by the index
/// directory's path relative to `dir`. Indexes without a fingerprint for
/// `algorithm` are skipped.
pub fn load_digests(
    dir: &Path,
    algorithm: Algorithm,
) -> AppMapResult<BTreeMap<String, IndexedDigest>> {
    let mut digests = BTreeMap::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || entry.file_name() != "metadata.json" {
            continue;
        }
        let Some(index_dir) = entry.path().parent() else {
            continue;
        };
        let text = std::fs::read_to_string(entry.path())?;
        let metadata: Metadata = match serde_json::from_str(&text) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping unreadable index {}: {e}", entry.path().display());
                continue;
            }
        };
        let Some(fingerprint) = metadata
            .fingerprints
            .iter()
            .find(|f| f.canonicalization_algorithm == algorithm.as_str())
        else {
            debug!("No {algorithm} fingerprint in {}", index_dir.display());
            continue;
        };
        let name = index_dir
            .strip_prefix(dir)
            .unwrap_or(index_dir)
            .to_string_lossy()
            .replace('\\', "/");
        digests.insert(
            name,
            IndexedDigest {
                digest: fingerprint.digest.clone(),
                is_test: metadata.is_test(),
            },
        );
    }
    Ok(digests)
}

/// Names present only in `head` (added), only in `base` (removed), or in
/// both with different digests (changed).
pub fn compare(
    base: &BTreeMap<String, IndexedDigest>,
    head: &BTreeMap<String, IndexedDigest>,
    tests_only: bool,
) -> ChangeSet {
    let wanted = |d: &IndexedDigest| !tests_only || d.is_test;
    let mut changes = ChangeSet::default();
    for (name, digest) in head.iter().filter(|(_, d)| wanted(d)) {
        match base.get(name) {
            None => changes.added.push(name.clone()),
            Some(previous) if previous.digest != digest.digest => {
                changes.changed.push(name.clone())
            }
            Some(_) => {}
        }
    }
    for (name, _) in base.iter().filter(|(_, d)| wanted(d)) {
        if !head.contains_key(name) {
            changes.removed.push(name.clone());
        }
    }
    changes
}
