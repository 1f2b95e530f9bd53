//! Change detection for top-level folders
//!
//! Detection looks only at the folder's own directory entry. Editing a file
//! in place deep inside a folder does not touch that entry, so such a change
//! is not seen until something in the folder itself is added, removed or
//! renamed.

use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::config::ScanConfig;
use crate::db::MetadataStore;
use crate::error::ScanError;

/// Slack absorbing coarse filesystem timestamps, in seconds
pub const MTIME_SLACK_SECS: f64 = 1.0;

/// Modification time of `path` as fractional seconds since the epoch
pub fn folder_mtime(path: &Path) -> Result<f64, ScanError> {
    let metadata = std::fs::metadata(path).map_err(|e| ScanError::from(e).with_path(path))?;
    let modified = metadata
        .modified()
        .map_err(|e| ScanError::from(e).with_path(path))?;
    // Pre-epoch timestamps clamp to zero
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(secs)
}

/// Whether a folder at `current` should be rescanned given its watermark
pub fn is_newer(current: f64, watermark: Option<f64>) -> bool {
    match watermark {
        None => true,
        Some(last) => current > last + MTIME_SLACK_SECS,
    }
}

/// Decides skip-vs-rescan per top-level folder
pub struct ChangeDetector<'a> {
    config: &'a ScanConfig,
    store: &'a dyn MetadataStore,
}

impl<'a> ChangeDetector<'a> {
    /// Create a detector reading watermarks from `store`
    pub fn new(config: &'a ScanConfig, store: &'a dyn MetadataStore) -> Self {
        Self { config, store }
    }

    /// Reserved names (hidden, cache, recycle, ignore list) are never candidates
    pub fn is_candidate_folder(&self, name: &str) -> bool {
        !name.is_empty() && !self.config.should_ignore_dir(name)
    }

    /// True when the folder exists and changed since its last full rescan
    pub fn needs_rescan(&self, folder: &str) -> Result<bool, ScanError> {
        if !self.is_candidate_folder(folder) {
            return Ok(false);
        }
        let path = self.config.media_root.join(folder);
        if !path.is_dir() {
            return Ok(false);
        }
        let current = match folder_mtime(&path) {
            Ok(mtime) => mtime,
            // Vanished between the check above and the stat
            Err(_) => return Ok(false),
        };
        let watermark = self.store.get_watermark(folder)?;
        Ok(is_newer(current, watermark))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ScanDatabase;

    #[test]
    fn test_is_newer_slack() {
        assert!(is_newer(10.0, None));
        assert!(!is_newer(10.0, Some(10.0)));
        assert!(!is_newer(10.9, Some(10.0)));
        assert!(!is_newer(11.0, Some(10.0)));
        assert!(is_newer(11.01, Some(10.0)));
        // Clock moved backwards: unchanged
        assert!(!is_newer(5.0, Some(10.0)));
    }

    #[test]
    fn test_first_scan_needs_rescan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vacation")).unwrap();
        let config = ScanConfig::new(dir.path());
        let db = ScanDatabase::open_memory().unwrap();

        let detector = ChangeDetector::new(&config, &db);
        assert!(detector.needs_rescan("vacation").unwrap());
    }

    #[test]
    fn test_watermark_suppresses_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("vacation");
        std::fs::create_dir(&folder).unwrap();
        let config = ScanConfig::new(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        db.upsert_watermark("vacation", folder_mtime(&folder).unwrap())
            .unwrap();

        let detector = ChangeDetector::new(&config, &db);
        assert!(!detector.needs_rescan("vacation").unwrap());
    }

    #[test]
    fn test_stale_watermark_triggers_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("vacation");
        std::fs::create_dir(&folder).unwrap();
        let config = ScanConfig::new(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        let current = folder_mtime(&folder).unwrap();
        db.upsert_watermark("vacation", current - 5.0).unwrap();

        let detector = ChangeDetector::new(&config, &db);
        assert!(detector.needs_rescan("vacation").unwrap());
    }

    #[test]
    fn test_missing_and_reserved_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        let config = ScanConfig::new(dir.path());
        let db = ScanDatabase::open_memory().unwrap();

        let detector = ChangeDetector::new(&config, &db);
        assert!(!detector.needs_rescan("gone").unwrap());
        assert!(!detector.needs_rescan(".cache").unwrap());
        assert!(!detector.is_candidate_folder(".recycle"));
        assert!(detector.is_candidate_folder("vacation"));
    }

    #[test]
    fn test_needs_rescan_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vacation")).unwrap();
        let config = ScanConfig::new(dir.path());
        let db = ScanDatabase::open_memory().unwrap();

        let detector = ChangeDetector::new(&config, &db);
        detector.needs_rescan("vacation").unwrap();
        assert!(db.list_watermarks().unwrap().is_empty());
    }
}
