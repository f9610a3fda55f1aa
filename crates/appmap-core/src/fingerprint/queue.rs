//! Batch fingerprinting: a de-duplicating work queue drained by a bounded
//! worker pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexSet;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::errors::AppMapError;
use crate::fingerprint::index::APPMAP_SUFFIX;
use crate::fingerprint::{FingerprintOutcome, Fingerprinter};

const IGNORED_DIRS: &[&str] = &[".git", "node_modules"];

/// Per-file tally of one batch. Lists are sorted so the report does not
/// depend on completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub indexed: Vec<PathBuf>,
    pub up_to_date: Vec<PathBuf>,
    pub too_large: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// Not attempted because the batch was aborted.
    pub skipped: Vec<PathBuf>,
    pub aborted: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.indexed.len()
            + self.up_to_date.len()
            + self.too_large.len()
            + self.failed.len()
            + self.skipped.len()
    }

    pub fn succeeded(&self) -> usize {
        self.indexed.len() + self.up_to_date.len()
    }

    fn sort(&mut self) {
        self.indexed.sort();
        self.up_to_date.sort();
        self.too_large.sort();
        self.failed.sort();
        self.skipped.sort();
    }
}

enum ItemResult {
    Done(FingerprintOutcome),
    TooLarge(PathBuf),
    Failed(PathBuf, String),
    Skipped(PathBuf),
}

/// Queue of trace files awaiting fingerprinting. Pushing a file that is
/// already queued is a no-op, so bursts of change notifications for the same
/// file collapse into one job.
pub struct FingerprintQueue {
    fingerprinter: Fingerprinter,
    pending: Mutex<IndexSet<PathBuf>>,
}

impl FingerprintQueue {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(config),
            pending: Mutex::new(IndexSet::new()),
        }
    }

    /// Queue `path` if it names a trace file. Returns true when it was not
    /// already queued.
    pub fn push(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if !path.to_string_lossy().ends_with(APPMAP_SUFFIX) {
            return false;
        }
        self.pending.lock().insert(path)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drain the queue and fingerprint every file on a pool of
    /// `config.workers` threads.
    ///
    /// Oversized and failing files are recorded and the batch continues,
    /// unless `abort_on_error` is set: then the first non-recoverable error
    /// stops the batch and unstarted files are reported as skipped.
    pub fn process(&self) -> BatchReport {
        let jobs: Vec<PathBuf> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect();
        if jobs.is_empty() {
            return BatchReport::default();
        }

        let abort = AtomicBool::new(false);
        let abort_on_error = self.fingerprinter.config().abort_on_error;
        let run = |path: &PathBuf| -> ItemResult {
            if abort.load(Ordering::SeqCst) {
                return ItemResult::Skipped(path.clone());
            }
            match self.fingerprinter.fingerprint(path) {
                Ok(outcome) => ItemResult::Done(outcome),
                Err(AppMapError::FileTooLarge { size, limit, .. }) => {
                    warn!(
                        "Skipping {}: {size} bytes exceeds the {limit} byte limit",
                        path.display()
                    );
                    ItemResult::TooLarge(path.clone())
                }
                Err(e) => {
                    warn!("Failed to fingerprint {}: {e}", path.display());
                    if abort_on_error && !e.is_recoverable() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    ItemResult::Failed(path.clone(), e.to_string())
                }
            }
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.fingerprinter.config().workers.max(1))
            .build();
        let results: Vec<ItemResult> = match pool {
            Ok(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
            Err(_) => jobs.iter().map(run).collect(),
        };

        let mut report = BatchReport {
            aborted: abort.load(Ordering::SeqCst),
            ..Default::default()
        };
        for result in results {
            match result {
                ItemResult::Done(FingerprintOutcome::Indexed { path, .. }) => {
                    report.indexed.push(path)
                }
                ItemResult::Done(FingerprintOutcome::UpToDate { path }) => {
                    report.up_to_date.push(path)
                }
                ItemResult::TooLarge(path) => report.too_large.push(path),
                ItemResult::Failed(path, message) => report.failed.push((path, message)),
                ItemResult::Skipped(path) => report.skipped.push(path),
            }
        }
        report.sort();
        info!(
            "Fingerprinted {} file(s): {} indexed, {} up to date, {} too large, {} failed, {} skipped",
            report.total(),
            report.indexed.len(),
            report.up_to_date.len(),
            report.too_large.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }
}

/// Every `*.appmap.json` below `dir`, sorted. `.git` and `node_modules`
/// are not descended into.
pub fn list_appmap_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && IGNORED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.to_string_lossy().ends_with(APPMAP_SUFFIX))
        .collect();
    files.sort();
    files
}

/// Fingerprint every trace below `dir`.
pub fn index_directory(dir: &Path, config: IndexConfig) -> BatchReport {
    let queue = FingerprintQueue::new(config);
    for path in list_appmap_files(dir) {
        queue.push(path);
    }
    queue.process()
}
