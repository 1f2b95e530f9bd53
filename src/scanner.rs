//! Scan orchestration
//!
//! One pass visits every top-level folder once:
//! skip when unchanged, otherwise replace its records, render its
//! thumbnails and finally advance its watermark. A folder's watermark is
//! written only after its records are committed.
//!
//! Two passes over the same media root must not run at the same time;
//! nothing here serializes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::ScanConfig;
use crate::db::MetadataStore;
use crate::detector::{folder_mtime, ChangeDetector};
use crate::error::{ScanError, ScanErrorKind};
use crate::extractor::extract_folder;
use crate::media_tool::MediaTool;
use crate::models::{FolderAction, FolderOutcome, ScanReport, ThumbnailSummary};
use crate::progress::ProgressReporter;
use crate::thumbs::{check_cache_dir, CacheCapability, ThumbnailGenerator};

/// Attempts for a store write before the pass fails
const STORE_ATTEMPTS: u32 = 3;

/// Pause between store write attempts
const STORE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Cooperative cancellation flag, checked between folders and between
/// thumbnail units
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn with_retry<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, ScanError>,
) -> Result<T, ScanError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_fatal() && attempt < STORE_ATTEMPTS => {
                log::warn!("{} failed (attempt {}/{}): {}", what, attempt, STORE_ATTEMPTS, e);
                attempt += 1;
                std::thread::sleep(STORE_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Build the thumbnail stage for this pass, or explain why it is off
fn prepare_thumbnails(config: &ScanConfig) -> Option<ThumbnailGenerator> {
    if !config.generate_thumbnails {
        log::info!("Thumbnail generation disabled by configuration");
        return None;
    }
    match check_cache_dir(config) {
        CacheCapability::Writable(_) => {
            match ThumbnailGenerator::new(config, MediaTool::from_config(config)) {
                Ok(generator) => Some(generator),
                Err(e) => {
                    log::error!("Could not start thumbnail workers: {}", e);
                    None
                }
            }
        }
        CacheCapability::NotWritable { root, reason } => {
            log::error!(
                "Cache directory not writable: {} ({}), thumbnail generation stopped",
                root.display(),
                reason
            );
            None
        }
    }
}

/// Process one top-level folder
pub fn scan_folder(
    config: &ScanConfig,
    store: &mut dyn MetadataStore,
    folder: &str,
    generator: Option<&ThumbnailGenerator>,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<(FolderOutcome, ThumbnailSummary), ScanError> {
    let outcome = |action, records, failures| FolderOutcome {
        folder: folder.to_string(),
        action,
        records,
        failures,
    };
    let folder_path = config.media_root.join(folder);

    if !folder_path.is_dir() {
        log::warn!("{} disappeared before scanning", folder);
        return Ok((outcome(FolderAction::Vanished, 0, 0), ThumbnailSummary::default()));
    }

    let changed = ChangeDetector::new(config, &*store).needs_rescan(folder)?;
    if !changed {
        log::info!("{} unchanged (SKIP)", folder);
        return Ok((outcome(FolderAction::Skipped, 0, 0), ThumbnailSummary::default()));
    }

    // Taken before the walk so edits made during it trigger the next pass
    let mtime = match folder_mtime(&folder_path) {
        Ok(mtime) => mtime,
        Err(e) => {
            log::warn!("{} disappeared before scanning: {}", folder, e.message);
            return Ok((outcome(FolderAction::Vanished, 0, 0), ThumbnailSummary::default()));
        }
    };

    log::info!("{} changed (SCAN)", folder);
    let extraction = extract_folder(config, &folder_path, folder, cancel);
    if extraction.cancelled {
        // A partial walk must not replace the complete record set
        log::warn!("{} walk cancelled, records left untouched", folder);
        return Ok((
            outcome(FolderAction::Interrupted, 0, extraction.failures),
            ThumbnailSummary::default(),
        ));
    }

    let written = with_retry("replace records", || {
        store.replace_folder_records(folder, &extraction.records)
    })?;
    log::info!(
        "{}: {} records written, {} failures, {} thumbnail candidates",
        folder,
        written,
        extraction.failures,
        extraction.candidates.len()
    );

    let thumbs = match generator {
        Some(generator) if !extraction.candidates.is_empty() => {
            let summary = generator.generate(&extraction.candidates, cancel);
            reporter.report_thumbs(folder, &summary);
            log::info!(
                "{}: {} of {} renditions written, {} failed",
                folder,
                summary.succeeded,
                summary.scheduled,
                summary.failed
            );
            summary
        }
        _ => ThumbnailSummary::default(),
    };

    if thumbs.cancelled > 0 {
        log::warn!("{} thumbnails cancelled, watermark held back", folder);
        return Ok((
            outcome(FolderAction::Interrupted, written, extraction.failures),
            thumbs,
        ));
    }

    with_retry("update watermark", || store.upsert_watermark(folder, mtime))?;
    Ok((outcome(FolderAction::Scanned, written, extraction.failures), thumbs))
}

/// Drop records and watermarks of indexed folders that are no longer listed
fn prune_removed_folders(
    store: &mut dyn MetadataStore,
    listed: &[String],
) -> Result<Vec<FolderOutcome>, ScanError> {
    let mut removed = Vec::new();
    for folder in store.known_folders()? {
        if listed.binary_search(&folder).is_ok() {
            continue;
        }
        with_retry("drop records", || store.replace_folder_records(&folder, &[]))?;
        with_retry("drop watermark", || store.remove_watermark(&folder))?;
        log::info!("{} no longer exists, removed from index", folder);
        removed.push(FolderOutcome {
            folder,
            action: FolderAction::Removed,
            records: 0,
            failures: 0,
        });
    }
    Ok(removed)
}

/// Run one full pass over the media root
///
/// The root is resolved to an absolute path first, so record keys and
/// cache paths are absolute. Fails only when the root is unusable or the
/// store cannot commit.
pub fn scan_media_root(
    config: &ScanConfig,
    store: &mut dyn MetadataStore,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<ScanReport, ScanError> {
    let start = Instant::now();
    let mut report = ScanReport::new();

    let resolved = config.with_absolute_root()?;
    let config = &resolved;
    let folders = config.validate()?;
    log::info!(
        "Scanning {} ({} top-level folders)",
        config.media_root.display(),
        folders.len()
    );
    reporter.report_start(&config.media_root, folders.len());

    let generator = prepare_thumbnails(config);
    report.thumbnails_enabled = generator.is_some();

    for folder in &folders {
        if cancel.is_cancelled() {
            log::warn!("Scan cancelled before {}", folder);
            report.cancelled = true;
            break;
        }

        let (outcome, thumbs) =
            scan_folder(config, store, folder, generator.as_ref(), cancel, reporter)?;
        if outcome.action == FolderAction::Interrupted {
            report.cancelled = true;
        }
        reporter.report_folder(&outcome);
        report.thumbnails.absorb(thumbs);
        report.push_folder(outcome);
    }

    if !report.cancelled {
        for outcome in prune_removed_folders(store, &folders)? {
            reporter.report_folder(&outcome);
            report.push_folder(outcome);
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "Scan finished: {} scanned, {} skipped, {} removed, {} records, {} failures in {}ms",
        report.folders_scanned,
        report.folders_skipped,
        report.folders_removed,
        report.records_written,
        report.file_failures,
        report.duration_ms
    );
    reporter.report_done(&report);
    Ok(report)
}

/// A pass running on its own thread
///
/// The thread owns the store for the duration of the pass.
#[derive(Debug)]
pub struct ScanHandle {
    cancel: CancelToken,
    thread: JoinHandle<Result<ScanReport, ScanError>>,
}

impl ScanHandle {
    /// Start a pass in the background
    pub fn start(
        config: ScanConfig,
        mut store: Box<dyn MetadataStore>,
        reporter: ProgressReporter,
    ) -> Result<Self, ScanError> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("media-scan".to_string())
            .spawn(move || scan_media_root(&config, store.as_mut(), &token, &reporter))
            .map_err(ScanError::from)?;
        Ok(Self { cancel, thread })
    }

    /// Token shared with the running pass
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the pass to stop at the next folder or thumbnail unit
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the pass has returned
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the pass to return
    pub fn join(self) -> Result<ScanReport, ScanError> {
        self.thread
            .join()
            .map_err(|_| ScanError::new(ScanErrorKind::Unknown, None, "scan thread panicked"))?
    }

    /// Cancel and wait
    pub fn stop(self) -> Result<ScanReport, ScanError> {
        self.cancel();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ScanDatabase;
    use crate::models::{FileRecord, FileType, SortKey, SortOrder};
    use image::{ImageBuffer, Rgb};
    use std::collections::HashMap;
    use std::path::Path;

    fn write_image(path: &Path, w: u32, h: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(w, h, Rgb([200, 100, 50]));
        img.save(path).unwrap();
    }

    fn config(root: &Path) -> ScanConfig {
        ScanConfig::builder()
            .media_root(root)
            .thumb_max_edge(8)
            .medium_max_edge(32)
            .workers(2)
            .ffmpeg_bin("/nonexistent/ffmpeg")
            .ffprobe_bin("/nonexistent/ffprobe")
            .build()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("vacation/beach.png"), 48, 32);
        std::fs::write(dir.path().join("vacation/notes.txt"), b"sunny").unwrap();
        write_image(&dir.path().join("work/chart.png"), 10, 10);
        dir
    }

    fn run(config: &ScanConfig, db: &mut ScanDatabase) -> ScanReport {
        scan_media_root(config, db, &CancelToken::new(), &ProgressReporter::default()).unwrap()
    }

    /// Store whose writes always fail, for commit-failure paths
    #[derive(Default)]
    struct BrokenStore {
        watermarks: HashMap<String, f64>,
        fail_replace: bool,
        replaced: Vec<String>,
    }

    impl MetadataStore for BrokenStore {
        fn replace_folder_records(&mut self, folder: &str, _: &[FileRecord]) -> Result<usize, ScanError> {
            if self.fail_replace {
                return Err(ScanError::database_error("disk I/O error"));
            }
            self.replaced.push(folder.to_string());
            Ok(0)
        }

        fn upsert_watermark(&mut self, folder: &str, mtime: f64) -> Result<(), ScanError> {
            self.watermarks.insert(folder.to_string(), mtime);
            Ok(())
        }

        fn get_watermark(&self, folder: &str) -> Result<Option<f64>, ScanError> {
            Ok(self.watermarks.get(folder).copied())
        }

        fn remove_watermark(&mut self, folder: &str) -> Result<(), ScanError> {
            self.watermarks.remove(folder);
            Ok(())
        }

        fn known_folders(&self) -> Result<Vec<String>, ScanError> {
            let mut folders: Vec<_> = self.watermarks.keys().cloned().collect();
            folders.sort();
            Ok(folders)
        }
    }

    #[test]
    fn test_first_pass_indexes_everything() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();

        let report = run(&config, &mut db);
        assert_eq!(report.folders_scanned, 2);
        assert_eq!(report.records_written, 3);
        assert!(report.thumbnails_enabled);
        assert_eq!(report.thumbnails.scheduled, 4);
        assert_eq!(report.thumbnails.succeeded, 4);

        let records = db
            .list_folder_records("vacation", SortKey::Name, SortOrder::Asc)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file_type, FileType::Image);
        assert_eq!((records[0].width, records[0].height), (Some(48), Some(32)));
        assert_eq!(records[1].file_type, FileType::Text);
        assert!(db.get_watermark("vacation").unwrap().is_some());
        assert!(dir.path().join(".cache/medium/vacation/beach.png").exists());
        // The cache itself is never indexed
        assert!(db.list_watermarks().unwrap().iter().all(|w| !w.folder.starts_with('.')));
    }

    #[test]
    fn test_second_pass_skips_unchanged() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();

        run(&config, &mut db);
        let before = db
            .list_folder_records("vacation", SortKey::Path, SortOrder::Asc)
            .unwrap();
        let thumb = dir.path().join(".cache/thumb/vacation/beach.png");
        let thumb_mtime = std::fs::metadata(&thumb).unwrap().modified().unwrap();

        let report = run(&config, &mut db);
        assert_eq!(report.folders_skipped, 2);
        assert_eq!(report.thumbnails.scheduled, 0);
        assert_eq!(
            db.list_folder_records("vacation", SortKey::Path, SortOrder::Asc).unwrap(),
            before
        );
        assert_eq!(std::fs::metadata(&thumb).unwrap().modified().unwrap(), thumb_mtime);
    }

    #[test]
    fn test_rescan_removes_stale_records() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        run(&config, &mut db);

        std::fs::remove_file(dir.path().join("vacation/notes.txt")).unwrap();
        std::fs::write(dir.path().join("vacation/todo.md"), b"- swim").unwrap();
        // Deletion may land inside the one-second slack; force the rescan
        db.upsert_watermark("vacation", 0.0).unwrap();

        let report = run(&config, &mut db);
        assert_eq!(report.folder("vacation").unwrap().action, FolderAction::Scanned);
        assert_eq!(report.folder("work").unwrap().action, FolderAction::Skipped);

        let names: Vec<_> = db
            .list_folder_records("vacation", SortKey::Name, SortOrder::Asc)
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, ["beach.png", "todo.md"]);
        assert!(db.get_watermark("vacation").unwrap().unwrap() > 0.0);
    }

    #[test]
    fn test_vanished_folder_keeps_watermark() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        db.upsert_watermark("gone", 5.0).unwrap();

        let (outcome, _) = scan_folder(
            &config,
            &mut db,
            "gone",
            None,
            &CancelToken::new(),
            &ProgressReporter::default(),
        )
        .unwrap();
        assert_eq!(outcome.action, FolderAction::Vanished);
        assert_eq!(db.get_watermark("gone").unwrap(), Some(5.0));
    }

    #[test]
    fn test_deleted_folder_is_dropped_from_index() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        run(&config, &mut db);

        std::fs::remove_dir_all(dir.path().join("work")).unwrap();
        let report = run(&config, &mut db);
        assert_eq!(report.folder("work").unwrap().action, FolderAction::Removed);
        assert_eq!(report.folders_removed, 1);
        assert_eq!(db.folder_record_count("work").unwrap(), 0);
        assert_eq!(db.get_watermark("work").unwrap(), None);
        assert_eq!(db.folder_record_count("vacation").unwrap(), 2);
    }

    #[test]
    fn test_emptied_root_is_a_pass_with_nothing_to_do() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        run(&config, &mut db);

        std::fs::remove_dir_all(dir.path().join("vacation")).unwrap();
        std::fs::remove_dir_all(dir.path().join("work")).unwrap();
        let report = run(&config, &mut db);
        assert_eq!(report.folders_removed, 2);
        assert_eq!(db.file_count().unwrap(), 0);
        assert!(db.list_watermarks().unwrap().is_empty());
    }

    #[test]
    fn test_relative_root_yields_absolute_keys() {
        let cwd = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir_in(&cwd).unwrap();
        write_image(&dir.path().join("a/x.png"), 4, 4);
        let relative = dir.path().strip_prefix(&cwd).unwrap();

        let config = ScanConfig::builder()
            .media_root(relative)
            .generate_thumbnails(false)
            .build();
        let mut db = ScanDatabase::open_memory().unwrap();
        run(&config, &mut db);

        let records = db.list_folder_records("a", SortKey::Path, SortOrder::Asc).unwrap();
        assert_eq!(records.len(), 1);
        assert!(Path::new(&records[0].file_path).is_absolute());
        assert_eq!(
            Path::new(&records[0].file_path),
            dir.path().canonicalize().unwrap().join("a/x.png")
        );
    }

    #[test]
    fn test_cancelled_walk_keeps_previous_records() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();
        run(&config, &mut db);
        db.upsert_watermark("vacation", 0.0).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let (outcome, thumbs) = scan_folder(
            &config.with_absolute_root().unwrap(),
            &mut db,
            "vacation",
            None,
            &cancel,
            &ProgressReporter::default(),
        )
        .unwrap();
        assert_eq!(outcome.action, FolderAction::Interrupted);
        assert_eq!(outcome.records, 0);
        assert_eq!(thumbs, ThumbnailSummary::default());
        assert_eq!(db.folder_record_count("vacation").unwrap(), 2);
        assert_eq!(db.get_watermark("vacation").unwrap(), Some(0.0));
    }

    #[test]
    fn test_cancel_before_start_touches_nothing() {
        let dir = fixture();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = scan_media_root(&config, &mut db, &cancel, &ProgressReporter::default()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.folders_scanned, 0);
        assert_eq!(db.file_count().unwrap(), 0);
        assert!(db.list_watermarks().unwrap().is_empty());
    }

    #[test]
    fn test_unwritable_cache_disables_thumbnails_only() {
        let dir = fixture();
        std::fs::write(dir.path().join(".cache"), b"not a directory").unwrap();
        let config = config(dir.path());
        let mut db = ScanDatabase::open_memory().unwrap();

        let report = run(&config, &mut db);
        assert!(!report.thumbnails_enabled);
        assert_eq!(report.thumbnails.scheduled, 0);
        assert_eq!(report.records_written, 3);
        assert!(db.get_watermark("work").unwrap().is_some());
    }

    #[test]
    fn test_disabled_thumbnails_by_config() {
        let dir = fixture();
        let config = ScanConfig::builder()
            .media_root(dir.path())
            .generate_thumbnails(false)
            .build();
        let mut db = ScanDatabase::open_memory().unwrap();

        let report = run(&config, &mut db);
        assert!(!report.thumbnails_enabled);
        assert!(!dir.path().join(".cache").exists());
    }

    #[test]
    fn test_commit_failure_fails_pass_without_watermark() {
        let dir = fixture();
        let config = config(dir.path());
        let mut store = BrokenStore {
            fail_replace: true,
            ..Default::default()
        };

        let err = scan_media_root(&config, &mut store, &CancelToken::new(), &ProgressReporter::default())
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::DatabaseError);
        assert!(store.watermarks.is_empty());
    }

    #[test]
    fn test_watermark_follows_replacement() {
        let dir = fixture();
        let config = ScanConfig::builder()
            .media_root(dir.path())
            .generate_thumbnails(false)
            .build();
        let mut store = BrokenStore::default();

        scan_media_root(&config, &mut store, &CancelToken::new(), &ProgressReporter::default()).unwrap();
        assert_eq!(store.replaced, ["vacation", "work"]);
        assert_eq!(store.watermarks.len(), 2);
    }

    #[test]
    fn test_scan_handle_runs_in_background() {
        let dir = fixture();
        let db_path = dir.path().join(".index.db");
        let config = config(dir.path());
        let store = ScanDatabase::open(&db_path).unwrap();

        let handle = ScanHandle::start(config, Box::new(store), ProgressReporter::default()).unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.folders_scanned, 2);

        let db = ScanDatabase::open(&db_path).unwrap();
        assert_eq!(db.file_count().unwrap(), 3);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
