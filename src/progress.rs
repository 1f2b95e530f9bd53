//! Progress reporting module for scan passes
//!
//! This module provides data structures and utilities for reporting
//! scan progress to external callers via stderr, one JSON object per line.

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::models::{FolderOutcome, ScanReport, ThumbnailSummary};

/// Start message sent when a pass begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Media root
    pub root: String,
    /// Number of top-level folders found
    pub folders: usize,
}

/// Sent once per top-level folder
#[derive(Debug, Clone, Serialize)]
pub struct FolderMessage {
    /// Message type identifier ("folder")
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Folder name
    pub folder: String,
    /// scan / skip / vanished / interrupted
    pub action: &'static str,
    /// Records written
    #[serde(rename = "r")]
    pub records: usize,
    /// Per-file failures
    #[serde(rename = "e")]
    pub failures: usize,
}

/// Sent after a folder's thumbnail batch
#[derive(Debug, Clone, Serialize)]
pub struct ThumbsMessage {
    /// Message type identifier ("thumbs")
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Folder name
    pub folder: String,
    /// Units scheduled
    pub scheduled: usize,
    /// Units written
    pub ok: usize,
    /// Units failed
    pub failed: usize,
}

/// Done message sent when a pass completes
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Folders rescanned
    pub scanned: u64,
    /// Folders skipped
    pub skipped: u64,
    /// Records written
    pub records: u64,
    /// Per-file failures
    pub failures: u64,
    /// Whether the pass was cancelled
    pub cancelled: bool,
    /// Total duration in milliseconds
    pub ms: u64,
}

/// Progress reporter writing JSON lines to stderr
///
/// Owned by the scan thread. A disabled reporter writes nothing and leaves
/// the sequence counter untouched.
#[derive(Debug)]
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Sequence number for messages
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ProgressReporter {
    /// Create a new ProgressReporter
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Output a serializable message to stderr as JSON
    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }

    /// Report pass start
    pub fn report_start(&self, root: &Path, folders: usize) {
        if !self.enabled {
            return;
        }
        let msg = StartMessage {
            msg_type: "start",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            root: root.to_string_lossy().to_string(),
            folders,
        };
        self.output_to_stderr(&msg);
    }

    /// Report a folder decision
    pub fn report_folder(&self, outcome: &FolderOutcome) {
        if !self.enabled {
            return;
        }
        let msg = FolderMessage {
            msg_type: "folder",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            folder: outcome.folder.clone(),
            action: outcome.action.as_str(),
            records: outcome.records,
            failures: outcome.failures,
        };
        self.output_to_stderr(&msg);
    }

    /// Report a finished thumbnail batch
    pub fn report_thumbs(&self, folder: &str, summary: &ThumbnailSummary) {
        if !self.enabled {
            return;
        }
        let msg = ThumbsMessage {
            msg_type: "thumbs",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            folder: folder.to_string(),
            scheduled: summary.scheduled,
            ok: summary.succeeded,
            failed: summary.failed,
        };
        self.output_to_stderr(&msg);
    }

    /// Report pass completion
    pub fn report_done(&self, report: &ScanReport) {
        if !self.enabled {
            return;
        }
        let msg = DoneMessage {
            msg_type: "done",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            scanned: report.folders_scanned,
            skipped: report.folders_skipped,
            records: report.records_written,
            failures: report.file_failures,
            cancelled: report.cancelled,
            ms: report.duration_ms,
        };
        self.output_to_stderr(&msg);
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
