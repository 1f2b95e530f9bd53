//! Error types for the media indexer

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error kinds that can occur while indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Metadata store operation failed
    DatabaseError,
    /// Hash computation failed
    HashError,
    /// Image decode, resize or encode failed
    ImageError,
    /// Video stream probing returned unusable output
    ProbeError,
    /// External tool could not be started or exited with failure
    SubprocessFailed,
    /// External tool exceeded its time budget
    Timeout,
    /// File type has no rendition
    UnsupportedType,
    /// Cache directory cannot be written
    CacheNotWritable,
    /// Configuration is unusable
    InvalidConfig,
    /// Work was abandoned because the scan was cancelled
    Cancelled,
    /// Unknown error
    Unknown,
}

/// Represents an error that occurred during a scan pass
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Attach the path that failed, keeping an existing one
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DatabaseError, None, message)
    }

    /// Create a probe error
    pub fn probe_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::ProbeError, Some(path), message)
    }

    /// Create a subprocess failure
    pub fn subprocess_failed(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::SubprocessFailed, path, message)
    }

    /// Create a timeout error
    pub fn timeout(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Timeout, path, message)
    }

    /// Create an unsupported type error
    pub fn unsupported(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::UnsupportedType,
            Some(path.clone()),
            format!("No rendition for file type: {:?}", path),
        )
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::InvalidConfig, None, message)
    }

    /// Create a cancellation marker
    pub fn cancelled() -> Self {
        Self::new(ScanErrorKind::Cancelled, None, "scan cancelled")
    }

    /// Only store failures abort a pass; everything else is logged and skipped.
    pub fn is_fatal(&self) -> bool {
        self.kind == ScanErrorKind::DatabaseError
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => ScanErrorKind::NotFound,
            std::io::ErrorKind::TimedOut => ScanErrorKind::Timeout,
            _ => ScanErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<image::ImageError> for ScanError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            other => Self::new(ScanErrorKind::ImageError, None, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_config(err.to_string())
    }
}
