//! Incremental media tree indexer
//!
//! Keeps a metadata database of every file under a media root in sync with
//! the disk, one top-level folder at a time, and maintains a two-tier
//! thumbnail cache for images and videos.

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod media_tool;
pub mod models;
pub mod progress;
pub mod scanner;
pub mod thumbs;

pub use config::ScanConfig;
pub use db::{MetadataStore, ScanDatabase};
pub use error::{ScanError, ScanErrorKind};
pub use models::{
    FileRecord, FileType, FolderAction, FolderOutcome, FolderWatermark, ScanReport, SizeClass,
    SortKey, SortOrder, ThumbnailSummary,
};
pub use progress::ProgressReporter;
pub use scanner::{scan_folder, scan_media_root, CancelToken, ScanHandle};
