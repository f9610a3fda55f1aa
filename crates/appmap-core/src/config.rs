//! Shared limits and environment-driven configuration for indexing and diffing.

/// Traces larger than this are rejected before parsing.
pub const MAX_APPMAP_SIZE: u64 = 50 * 1000 * 1000;

pub const DEFAULT_INDEX_WORKERS: usize = 2;
pub const MAX_INDEX_WORKERS: usize = 5;

/// Number of base candidates compared when one head subtree could have moved.
pub const DEFAULT_DIFF_CANDIDATES: usize = 3;
pub const MAX_DIFF_CANDIDATES: usize = 32;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_workers(value: i64) -> usize {
    clamp_int(value, 1, MAX_INDEX_WORKERS as i64) as usize
}

pub fn clamp_candidates(value: i64) -> usize {
    clamp_int(value, 1, MAX_DIFF_CANDIDATES as i64) as usize
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_number(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.trim().parse::<i64>().ok()
}

/// Settings for the fingerprinter and its work queue.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Byte ceiling above which a trace is reported as too large.
    pub max_appmap_size: u64,
    /// Size of the worker pool used by batch indexing.
    pub workers: usize,
    /// Whether the `version` marker is re-read before trusting an index.
    /// Watch loops turn this off after their initial pass.
    pub check_version: bool,
    /// Stop a batch at the first non-recoverable error.
    pub abort_on_error: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_appmap_size: MAX_APPMAP_SIZE,
            workers: DEFAULT_INDEX_WORKERS,
            check_version: true,
            abort_on_error: false,
        }
    }
}

impl IndexConfig {
    /// Defaults overridden by `APPMAP_MAX_SIZE`, `APPMAP_INDEX_WORKERS` and
    /// `APPMAP_ABORT_ON_ERROR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_number("APPMAP_MAX_SIZE") {
            if size > 0 {
                config.max_appmap_size = size as u64;
            }
        }
        if let Some(workers) = env_number("APPMAP_INDEX_WORKERS") {
            config.workers = clamp_workers(workers);
        }
        if let Some(abort) = env_flag("APPMAP_ABORT_ON_ERROR") {
            config.abort_on_error = abort;
        }
        config
    }

    pub fn with_max_appmap_size(mut self, max_appmap_size: u64) -> Self {
        self.max_appmap_size = max_appmap_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = clamp_workers(i64::try_from(workers).unwrap_or(i64::MAX));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_int(10, 1, 5), 5);
        assert_eq!(clamp_int(-3, 1, 5), 1);
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(100), MAX_INDEX_WORKERS);
        assert_eq!(clamp_candidates(3), 3);
        assert_eq!(clamp_candidates(1000), MAX_DIFF_CANDIDATES);
    }

    #[test]
    fn default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.max_appmap_size, MAX_APPMAP_SIZE);
        assert_eq!(config.workers, DEFAULT_INDEX_WORKERS);
        assert!(config.check_version);
        assert!(!config.abort_on_error);
    }

    #[test]
    fn builder_setters_clamp() {
        let config = IndexConfig::default()
            .with_workers(64)
            .with_max_appmap_size(10);
        assert_eq!(config.workers, MAX_INDEX_WORKERS);
        assert_eq!(config.max_appmap_size, 10);
    }

    #[test]
    fn oversized_worker_count_saturates() {
        let config = IndexConfig::default().with_workers(usize::MAX);
        assert_eq!(config.workers, MAX_INDEX_WORKERS);
        assert_eq!(IndexConfig::default().with_workers(0).workers, 1);
    }
}
