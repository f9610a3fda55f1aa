//! Fingerprinting: canonical digests of a trace, persisted in an index
//! directory tied to the trace's modification time.

pub mod index;
pub mod queue;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::appmap::AppMap;
use crate::builder::AppMapBuilder;
use crate::canonicalize::Algorithm;
use crate::config::IndexConfig;
use crate::errors::{AppMapError, AppMapResult};
use crate::models::{sha256_hex, Fingerprint, Metadata, FINGERPRINT_ALGORITHM};

pub use index::{index_dir_for, AppMapIndex, APPMAP_SUFFIX};
pub use queue::{index_directory, list_appmap_files, BatchReport, FingerprintQueue};

/// Index format version. Changing it invalidates every existing index.
///
/// - 1.2.0: `metadata.json` carries the computed fingerprints; adds the
///   `trace` algorithm.
/// - 1.1.4: missing `status_code` filled in on normalized traces.
pub const VERSION: &str = "1.2.0";

#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintOutcome {
    /// Artifacts were (re)written.
    Indexed {
        path: PathBuf,
        fingerprints: Vec<Fingerprint>,
    },
    /// Version and mtime matched; nothing was written.
    UpToDate { path: PathBuf },
}

/// Digest of the serialized trace.
pub fn appmap_digest(appmap: &AppMap) -> AppMapResult<String> {
    Ok(sha256_hex(serde_json::to_vec(appmap)?))
}

/// One fingerprint per registered algorithm, in registry order.
pub fn compute_fingerprints(appmap: &AppMap) -> AppMapResult<Vec<Fingerprint>> {
    let appmap_digest = appmap_digest(appmap)?;
    Algorithm::ALL
        .iter()
        .map(|algorithm| {
            Ok(Fingerprint {
                appmap_digest: appmap_digest.clone(),
                canonicalization_algorithm: algorithm.as_str().to_string(),
                digest: algorithm.apply(appmap).digest()?,
                fingerprint_algorithm: FINGERPRINT_ALGORITHM.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: IndexConfig,
}

impl Fingerprinter {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Whether `path` already has a current index.
    pub fn is_up_to_date(&self, path: &Path) -> bool {
        let index = AppMapIndex::new(path);
        (!self.config.check_version || index.version_up_to_date(VERSION))
            && index.index_up_to_date()
    }

    /// Index one trace file unless its index is already current.
    ///
    /// Files over the configured size ceiling fail with
    /// [`AppMapError::FileTooLarge`] and leave any existing index untouched.
    pub fn fingerprint(&self, path: &Path) -> AppMapResult<FingerprintOutcome> {
        debug!("Fingerprinting {}", path.display());
        let index = AppMapIndex::new(path);

        if self.is_up_to_date(path) {
            debug!("Fingerprint of {} is up to date", path.display());
            return Ok(FingerprintOutcome::UpToDate {
                path: path.to_path_buf(),
            });
        }

        let size = index.appmap_file_size()?;
        if size > self.config.max_appmap_size {
            return Err(AppMapError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.config.max_appmap_size,
            });
        }

        let appmap = AppMapBuilder::from_file(path, self.config.max_appmap_size)?
            .normalize()
            .build();
        let fingerprints = compute_fingerprints(&appmap)?;

        let mut metadata: Metadata = appmap.metadata().clone();
        metadata.fingerprints = fingerprints.clone();

        let mut artifacts = vec![
            ("version".to_string(), VERSION.to_string()),
            (
                "classMap.json".to_string(),
                serde_json::to_string_pretty(&appmap.class_map().to_entries())?,
            ),
            (
                "metadata.json".to_string(),
                serde_json::to_string_pretty(&metadata)?,
            ),
        ];
        for algorithm in Algorithm::ALL {
            artifacts.push((
                format!("canonical.{algorithm}.json"),
                algorithm.apply(&appmap).to_json()?,
            ));
        }

        let appmap_json = serde_json::to_string_pretty(&appmap)?;
        index.write(&artifacts, &appmap_json)?;
        info!("Indexed {}", path.display());

        Ok(FingerprintOutcome::Indexed {
            path: path.to_path_buf(),
            fingerprints,
        })
    }
}

/// Fingerprints recorded in an index's `metadata.json`.
pub fn read_fingerprints(index_dir: &Path) -> AppMapResult<Vec<Fingerprint>> {
    let text = std::fs::read_to_string(index_dir.join("metadata.json"))?;
    let metadata: Metadata = serde_json::from_str(&text)?;
    Ok(metadata.fingerprints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    use crate::test_support::{
        http_sql_trace, nested_function_trace, noisy_http_sql_trace, synthetic_trace,
    };

    fn write_trace(dir: &Path, name: &str, trace: &str) -> PathBuf {
        let path = dir.join(format!("{name}.appmap.json"));
        fs::write(&path, trace).unwrap();
        path
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "users", &http_sql_trace(5));
        let outcome = Fingerprinter::default().fingerprint(&path).unwrap();
        let FingerprintOutcome::Indexed { fingerprints, .. } = outcome else {
            panic!("expected a fresh index");
        };
        assert_eq!(fingerprints.len(), Algorithm::ALL.len());

        let index_dir = dir.path().join("users");
        for name in ["version", "mtime", "classMap.json", "metadata.json"] {
            assert!(index_dir.join(name).is_file(), "{name}");
        }
        for algorithm in Algorithm::ALL {
            assert!(index_dir.join(format!("canonical.{algorithm}.json")).is_file());
        }
        assert_eq!(fs::read_to_string(index_dir.join("version")).unwrap(), VERSION);
        assert_eq!(read_fingerprints(&index_dir).unwrap(), fingerprints);

        // The trace itself is rewritten in normalized form.
        let rewritten: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["events"][3]["http_server_response"]["status_code"], 200);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "leader", &nested_function_trace());
        let fingerprinter = Fingerprinter::default();
        assert!(matches!(
            fingerprinter.fingerprint(&path).unwrap(),
            FingerprintOutcome::Indexed { .. }
        ));

        let metadata_path = dir.path().join("leader").join("metadata.json");
        set_mtime(&metadata_path, 1_000);
        let before = fs::metadata(&metadata_path).unwrap().modified().unwrap();

        assert!(matches!(
            fingerprinter.fingerprint(&path).unwrap(),
            FingerprintOutcome::UpToDate { .. }
        ));
        let after = fs::metadata(&metadata_path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn modified_trace_is_reindexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "leader", &nested_function_trace());
        let fingerprinter = Fingerprinter::default();
        fingerprinter.fingerprint(&path).unwrap();
        set_mtime(&path, 2_000);
        assert!(matches!(
            fingerprinter.fingerprint(&path).unwrap(),
            FingerprintOutcome::Indexed { .. }
        ));
    }

    #[test]
    fn version_change_invalidates_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "leader", &nested_function_trace());
        let fingerprinter = Fingerprinter::default();
        fingerprinter.fingerprint(&path).unwrap();
        fs::write(dir.path().join("leader").join("version"), "0.0.1").unwrap();
        assert!(matches!(
            fingerprinter.fingerprint(&path).unwrap(),
            FingerprintOutcome::Indexed { .. }
        ));

        fs::write(dir.path().join("leader").join("version"), "0.0.1").unwrap();
        let lenient = Fingerprinter::new(IndexConfig {
            check_version: false,
            ..IndexConfig::default()
        });
        assert!(matches!(
            lenient.fingerprint(&path).unwrap(),
            FingerprintOutcome::UpToDate { .. }
        ));
    }

    #[test]
    fn oversized_trace_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let trace = http_sql_trace(5);
        let path = write_trace(dir.path(), "big", &trace);
        let fingerprinter = Fingerprinter::new(IndexConfig::default().with_max_appmap_size(100));
        match fingerprinter.fingerprint(&path) {
            Err(AppMapError::FileTooLarge { size, limit, .. }) => {
                assert_eq!(size, trace.len() as u64);
                assert_eq!(limit, 100);
            }
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
        assert!(!dir.path().join("big").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), trace);
    }

    #[test]
    fn malformed_trace_leaves_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "leader", &nested_function_trace());
        let fingerprinter = Fingerprinter::default();
        fingerprinter.fingerprint(&path).unwrap();
        let metadata_path = dir.path().join("leader").join("metadata.json");
        let before = fs::read_to_string(&metadata_path).unwrap();

        fs::write(&path, "{\"events\": [").unwrap();
        set_mtime(&path, 3_000);
        assert!(matches!(
            fingerprinter.fingerprint(&path),
            Err(AppMapError::Json(_))
        ));
        assert_eq!(fs::read_to_string(&metadata_path).unwrap(), before);
    }

    #[test]
    fn digests_stable_under_noise() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_trace(dir.path(), "a", &noisy_http_sql_trace(1, 1, 10, 0.5));
        let b = write_trace(dir.path(), "b", &noisy_http_sql_trace(2, 9, 99, 1.5));
        let fingerprinter = Fingerprinter::default();
        let digests = |path: &Path| -> Vec<String> {
            match fingerprinter.fingerprint(path).unwrap() {
                FingerprintOutcome::Indexed { fingerprints, .. } => {
                    fingerprints.into_iter().map(|f| f.digest).collect()
                }
                other => panic!("unexpected {other:?}"),
            }
        };
        assert_eq!(digests(&a), digests(&b));
    }

    #[test]
    fn deep_trace_is_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), "deep", &synthetic_trace(1, 5000));
        let FingerprintOutcome::Indexed { fingerprints, .. } =
            Fingerprinter::default().fingerprint(&path).unwrap()
        else {
            panic!("expected a fresh index");
        };
        assert_eq!(fingerprints.len(), Algorithm::ALL.len());

        let appmap = AppMapBuilder::from_file(&path, u64::MAX)
            .unwrap()
            .normalize()
            .build();
        let index_dir = dir.path().join("deep");
        let canonical = fs::read_to_string(index_dir.join("canonical.trace.json")).unwrap();
        assert_eq!(canonical, Algorithm::Trace.apply(&appmap).to_json().unwrap());
        let trace = fingerprints
            .iter()
            .find(|f| f.canonicalization_algorithm == "trace")
            .unwrap();
        assert_eq!(trace.digest, sha256_hex(canonical));
    }
}
