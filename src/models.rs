//! Core data models for the media indexer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sentinel stored in place of a hash when the file could not be read
pub const UNKNOWN_HASH: &str = "unknown";

/// File classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Image files (jpg, png, gif, ...)
    Image,
    /// Video files (mp4, mov, mkv, avi)
    Video,
    /// Plain text files (txt, md, log)
    Text,
    /// Anything else
    Other,
}

impl FileType {
    /// Infer file type from an extension (without the dot)
    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        match ext_lower.as_str() {
            "jpg" | "jpeg" | "jpe" | "png" | "bmp" | "gif" | "tiff" | "tif" => FileType::Image,
            "mp4" | "avi" | "mov" | "mkv" => FileType::Video,
            "txt" | "md" | "log" => FileType::Text,
            _ => FileType::Other,
        }
    }

    /// Infer file type from a path's extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileType::Other)
    }

    /// Parse the stored string form
    pub fn parse(s: &str) -> Self {
        match s {
            "image" => FileType::Image,
            "video" => FileType::Video,
            "text" => FileType::Text,
            _ => FileType::Other,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Text => "text",
            FileType::Other => "other",
        }
    }

    /// Whether files of this type get cached renditions
    pub fn is_candidate(&self) -> bool {
        matches!(self, FileType::Image | FileType::Video)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One indexed file, keyed by its absolute path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path (unique key)
    pub file_path: String,
    /// First path segment under the media root
    pub root_folder: String,
    /// File name with extension
    pub file_name: String,
    /// Classification
    pub file_type: FileType,
    /// Size in bytes
    pub file_size: u64,
    /// Hex MD5 digest, or [`UNKNOWN_HASH`]
    pub content_hash: String,
    /// Pixel width (images only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height (images only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Last-seen modification time of a top-level folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderWatermark {
    /// Folder name under the media root
    pub folder: String,
    /// Seconds since the Unix epoch
    pub last_mtime: f64,
}

/// Rendition tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    /// Small grid preview
    Thumb,
    /// Large viewer image
    Medium,
}

impl SizeClass {
    /// Both tiers, in scheduling order
    pub const ALL: [SizeClass; 2] = [SizeClass::Thumb, SizeClass::Medium];

    /// Directory name under the cache root
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Thumb => "thumb",
            SizeClass::Medium => "medium",
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column to order a folder listing by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Absolute path
    #[default]
    Path,
    /// File name
    Name,
    /// File type
    Type,
    /// File size
    Size,
}

impl SortKey {
    /// Unrecognised keys fall back to path ordering
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortKey::Name,
            "type" => SortKey::Type,
            "size" => SortKey::Size,
            _ => SortKey::Path,
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortKey::Path => "file_path",
            SortKey::Name => "file_name",
            SortKey::Type => "file_type",
            SortKey::Size => "file_size",
        }
    }
}

/// Listing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// What happened to one top-level folder during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderAction {
    /// Records replaced, watermark advanced
    Scanned,
    /// Unchanged since the watermark
    Skipped,
    /// Disappeared between listing and stat
    Vanished,
    /// Cut short by cancellation; watermark held back. Records are left
    /// untouched when the walk stopped, replaced when only thumbnails did
    Interrupted,
    /// Folder no longer exists; its records and watermark were dropped
    Removed,
}

impl FolderAction {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderAction::Scanned => "scan",
            FolderAction::Skipped => "skip",
            FolderAction::Vanished => "vanished",
            FolderAction::Interrupted => "interrupted",
            FolderAction::Removed => "removed",
        }
    }
}

/// Per-folder line of a [`ScanReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderOutcome {
    /// Folder name
    pub folder: String,
    /// Decision taken
    pub action: FolderAction,
    /// Records written
    pub records: usize,
    /// Files that could not be indexed
    pub failures: usize,
}

/// Counts from one thumbnail batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSummary {
    /// (file, size class) units queued
    pub scheduled: usize,
    /// Renditions written
    pub succeeded: usize,
    /// Units that failed
    pub failed: usize,
    /// Units dropped because of cancellation
    pub cancelled: usize,
}

impl ThumbnailSummary {
    /// Fold another batch into this one
    pub fn absorb(&mut self, other: ThumbnailSummary) {
        self.scheduled += other.scheduled;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Result of a scan pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// Folders whose records were replaced
    pub folders_scanned: u64,
    /// Folders skipped as unchanged
    pub folders_skipped: u64,
    /// Folders that disappeared mid-pass
    pub folders_vanished: u64,
    /// Previously indexed folders gone from the root
    pub folders_removed: u64,
    /// Records written across all folders
    pub records_written: u64,
    /// Per-file extraction failures
    pub file_failures: u64,
    /// Whether the thumbnail stage ran
    pub thumbnails_enabled: bool,
    /// Aggregated thumbnail counts
    pub thumbnails: ThumbnailSummary,
    /// Whether the pass stopped early
    pub cancelled: bool,
    /// Per-folder outcomes in processing order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<FolderOutcome>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl Default for ScanReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            folders_scanned: 0,
            folders_skipped: 0,
            folders_vanished: 0,
            folders_removed: 0,
            records_written: 0,
            file_failures: 0,
            thumbnails_enabled: false,
            thumbnails: ThumbnailSummary::default(),
            cancelled: false,
            folders: Vec::new(),
            duration_ms: 0,
        }
    }
}

impl ScanReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a folder outcome and bump the matching counter
    pub fn push_folder(&mut self, outcome: FolderOutcome) {
        match outcome.action {
            FolderAction::Scanned | FolderAction::Interrupted => self.folders_scanned += 1,
            FolderAction::Skipped => self.folders_skipped += 1,
            FolderAction::Vanished => self.folders_vanished += 1,
            FolderAction::Removed => self.folders_removed += 1,
        }
        self.records_written += outcome.records as u64;
        self.file_failures += outcome.failures as u64;
        self.folders.push(outcome);
    }

    /// Outcome for a folder, if it was visited
    pub fn folder(&self, name: &str) -> Option<&FolderOutcome> {
        self.folders.iter().find(|f| f.folder == name)
    }
}
