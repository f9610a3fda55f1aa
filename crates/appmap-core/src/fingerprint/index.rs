//! On-disk index directory that sits next to each trace file.
//!
//! `tmp/appmap/login.appmap.json` is indexed into `tmp/appmap/login/`:
//!
//! ```text
//! login/
//!   version                 index format version
//!   mtime                   trace modification time, epoch millis
//!   classMap.json
//!   metadata.json           metadata plus computed fingerprints
//!   canonical.<alg>.json    one per canonicalization algorithm
//! ```
//!
//! Artifacts are staged in a temporary directory and swapped into place with
//! renames, so readers never see a half-written index.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::errors::{AppMapError, AppMapResult};

pub const APPMAP_SUFFIX: &str = ".appmap.json";
const TEMP_APPMAP: &str = "appmap.tmp";

/// Modification time of `path` in epoch milliseconds.
pub fn mtime_millis(path: &Path) -> AppMapResult<u128> {
    let modified = fs::metadata(path)?.modified()?;
    let elapsed = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppMapError::Index(format!("{}: {e}", path.display())))?;
    Ok(elapsed.as_millis())
}

/// Index directory for a trace path: the path with `.appmap.json` (or, for
/// other names, the extension) removed.
pub fn index_dir_for(appmap_path: &Path) -> PathBuf {
    let text = appmap_path.to_string_lossy();
    match text.strip_suffix(APPMAP_SUFFIX) {
        Some(stem) => PathBuf::from(stem),
        None => appmap_path.with_extension(""),
    }
}

#[derive(Debug, Clone)]
pub struct AppMapIndex {
    appmap_path: PathBuf,
    index_dir: PathBuf,
}

impl AppMapIndex {
    pub fn new(appmap_path: impl Into<PathBuf>) -> Self {
        let appmap_path = appmap_path.into();
        let index_dir = index_dir_for(&appmap_path);
        Self {
            appmap_path,
            index_dir,
        }
    }

    pub fn appmap_path(&self) -> &Path {
        &self.appmap_path
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.index_dir.join(name)
    }

    pub fn appmap_file_size(&self) -> AppMapResult<u64> {
        Ok(fs::metadata(&self.appmap_path)?.len())
    }

    fn read_marker(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.artifact_path(name))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn version_up_to_date(&self, version: &str) -> bool {
        self.read_marker("version").as_deref() == Some(version)
    }

    /// True when the recorded `mtime` matches the trace file.
    pub fn index_up_to_date(&self) -> bool {
        let Some(recorded) = self.read_marker("mtime") else {
            return false;
        };
        match mtime_millis(&self.appmap_path) {
            Ok(current) => recorded == current.to_string(),
            Err(e) => {
                debug!("Cannot stat {}: {e}", self.appmap_path.display());
                false
            }
        }
    }

    /// Replace the whole index with `artifacts` and move `appmap_json` over
    /// the trace file.
    ///
    /// Everything is first written to a staging directory beside the index.
    /// The normalized trace is staged as `appmap.tmp` and its modification
    /// time recorded in `mtime`; the final rename over the trace keeps that
    /// time, so the next freshness check sees the index as current. On error
    /// the staging directory is discarded and the previous index is kept.
    pub fn write(&self, artifacts: &[(String, String)], appmap_json: &str) -> AppMapResult<()> {
        let parent = self
            .index_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".appmap-index-")
            .tempdir_in(parent)?;
        for (name, contents) in artifacts {
            fs::write(staging.path().join(name), contents)?;
        }
        let staged_appmap = staging.path().join(TEMP_APPMAP);
        fs::write(&staged_appmap, appmap_json)?;
        let indexed_at = mtime_millis(&staged_appmap)?;
        fs::write(staging.path().join("mtime"), indexed_at.to_string())?;

        let backup = tempfile::Builder::new()
            .prefix(".appmap-index-old-")
            .tempdir_in(parent)?;
        let previous = backup.path().join("previous");
        let had_previous = self.index_dir.is_dir();
        if had_previous {
            fs::rename(&self.index_dir, &previous)?;
        }
        if let Err(e) = fs::rename(staging.path(), &self.index_dir) {
            if had_previous {
                fs::rename(&previous, &self.index_dir)?;
            }
            return Err(e.into());
        }

        fs::rename(self.index_dir.join(TEMP_APPMAP), &self.appmap_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_dir_strips_suffix() {
        assert_eq!(
            index_dir_for(Path::new("tmp/appmap/login.appmap.json")),
            PathBuf::from("tmp/appmap/login")
        );
        assert_eq!(
            index_dir_for(Path::new("tmp/trace.json")),
            PathBuf::from("tmp/trace")
        );
    }

    #[test]
    fn write_swaps_index_and_records_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.appmap.json");
        fs::write(&path, "{}").unwrap();
        let index = AppMapIndex::new(&path);

        fs::create_dir_all(index.index_dir()).unwrap();
        fs::write(index.artifact_path("stale.json"), "old").unwrap();

        index
            .write(&[("version".to_string(), "9".to_string())], "{\"events\":[]}")
            .unwrap();

        assert!(!index.artifact_path("stale.json").exists());
        assert!(!index.artifact_path(TEMP_APPMAP).exists());
        assert!(index.version_up_to_date("9"));
        assert!(index.index_up_to_date());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"events\":[]}");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(".appmap-index"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn missing_markers_are_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.appmap.json");
        fs::write(&path, "{}").unwrap();
        let index = AppMapIndex::new(&path);
        assert!(!index.version_up_to_date("1"));
        assert!(!index.index_up_to_date());
    }
}
