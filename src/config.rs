//! Configuration for the media indexer

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScanError;
use crate::models::SizeClass;

/// Default cache directory name under the media root
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Default recycle directory name under the media root
pub const DEFAULT_RECYCLE_DIR: &str = ".recycle";

/// Default longest edge of the "thumb" rendition
pub const DEFAULT_THUMB_MAX_EDGE: u32 = 200;

/// Default longest edge of the "medium" rendition
pub const DEFAULT_MEDIUM_MAX_EDGE: u32 = 2000;

/// Default thumbnail worker count
pub const DEFAULT_WORKERS: usize = 8;

/// Default budget for a single ffprobe/ffmpeg invocation (30 s)
pub const DEFAULT_SUBPROCESS_TIMEOUT_MS: u64 = 30_000;

/// Default JPEG quality for renditions
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Configuration for a scan pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Media root; its direct child directories are the top-level folders
    pub media_root: PathBuf,

    /// Name of the cache directory under the media root
    pub cache_dir_name: String,

    /// Name of the recycle directory under the media root
    pub recycle_dir_name: String,

    /// Directory names to ignore at any depth
    /// Names starting with '.' are always ignored
    pub ignore_dirs: HashSet<String>,

    /// Longest edge of the "thumb" rendition
    pub thumb_max_edge: u32,

    /// Longest edge of the "medium" rendition
    pub medium_max_edge: u32,

    /// Number of thumbnail workers
    /// 0 means auto-detect (CPU cores)
    pub workers: usize,

    /// Whether to run the thumbnail stage at all
    pub generate_thumbnails: bool,

    /// Time budget for one external tool invocation, in milliseconds
    pub subprocess_timeout_ms: u64,

    /// ffmpeg executable
    pub ffmpeg_bin: PathBuf,

    /// ffprobe executable
    pub ffprobe_bin: PathBuf,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Database path for storing records
    pub db_path: Option<PathBuf>,

    /// Emit JSON-lines progress on stderr
    pub progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::new(),
            cache_dir_name: DEFAULT_CACHE_DIR.to_string(),
            recycle_dir_name: DEFAULT_RECYCLE_DIR.to_string(),
            ignore_dirs: Self::default_ignore_dirs(),
            thumb_max_edge: DEFAULT_THUMB_MAX_EDGE,
            medium_max_edge: DEFAULT_MEDIUM_MAX_EDGE,
            workers: DEFAULT_WORKERS,
            generate_thumbnails: true,
            subprocess_timeout_ms: DEFAULT_SUBPROCESS_TIMEOUT_MS,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            db_path: None,
            progress: false,
        }
    }
}

impl ScanConfig {
    /// Create a new config for the given media root
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path).map_err(|e| ScanError::from(e).with_path(path))?;
        let config = serde_json::from_str(&text).map_err(|e| ScanError::from(e).with_path(path))?;
        Ok(config)
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            ".svn",
            "__pycache__",
            DEFAULT_CACHE_DIR,
            DEFAULT_RECYCLE_DIR,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        // Hidden, cache and recycle markers all start with '.'
        if name.starts_with('.') {
            return true;
        }
        name == self.cache_dir_name || name == self.recycle_dir_name || self.ignore_dirs.contains(name)
    }

    /// Root of the rendition cache
    pub fn cache_root(&self) -> PathBuf {
        self.media_root.join(&self.cache_dir_name)
    }

    /// Root of one size class inside the cache
    pub fn size_class_root(&self, class: SizeClass) -> PathBuf {
        self.cache_root().join(class.as_str())
    }

    /// Longest edge for a size class
    pub fn max_edge(&self, class: SizeClass) -> u32 {
        match class {
            SizeClass::Thumb => self.thumb_max_edge,
            SizeClass::Medium => self.medium_max_edge,
        }
    }

    /// Get the effective number of thumbnail workers
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    /// Time budget for one external tool invocation
    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_millis(self.subprocess_timeout_ms)
    }

    /// Copy of this config with the media root made absolute
    ///
    /// Record keys and cache paths are derived from the root, so a pass
    /// works on the resolved form.
    pub fn with_absolute_root(&self) -> Result<ScanConfig, ScanError> {
        if !self.media_root.is_dir() {
            return Err(ScanError::not_found(self.media_root.clone()));
        }
        let media_root = self
            .media_root
            .canonicalize()
            .map_err(|e| ScanError::from(e).with_path(&self.media_root))?;
        Ok(ScanConfig {
            media_root,
            ..self.clone()
        })
    }

    /// Check the media root and return its top-level folder names, sorted
    ///
    /// A root without folders is valid and yields an empty list.
    pub fn validate(&self) -> Result<Vec<String>, ScanError> {
        if self.thumb_max_edge == 0 || self.medium_max_edge == 0 {
            return Err(ScanError::invalid_config("rendition bounds must be positive"));
        }
        if !self.media_root.is_dir() {
            return Err(ScanError::not_found(self.media_root.clone()));
        }
        let folders = self.list_top_level_folders()?;
        if folders.is_empty() {
            log::warn!("No top-level folders under {}", self.media_root.display());
        }
        Ok(folders)
    }

    /// Direct child directories of the media root that are not reserved
    pub fn list_top_level_folders(&self) -> Result<Vec<String>, ScanError> {
        let entries = std::fs::read_dir(&self.media_root)
            .map_err(|e| ScanError::from(e).with_path(&self.media_root))?;

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ScanError::from(e).with_path(&self.media_root))?;
            if !entry.path().is_dir() {
                continue;
            }
            // Non-UTF-8 names cannot round-trip through the store key
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                log::warn!("Skipping folder with non UTF-8 name: {:?}", entry.path());
                continue;
            };
            if !self.should_ignore_dir(&name) {
                folders.push(name);
            }
        }
        folders.sort();
        Ok(folders)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the media root
    pub fn media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.media_root = root.into();
        self
    }

    /// Set the cache directory name
    pub fn cache_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.cache_dir_name = name.into();
        self
    }

    /// Set the recycle directory name
    pub fn recycle_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.recycle_dir_name = name.into();
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Set the "thumb" bound
    pub fn thumb_max_edge(mut self, edge: u32) -> Self {
        self.config.thumb_max_edge = edge;
        self
    }

    /// Set the "medium" bound
    pub fn medium_max_edge(mut self, edge: u32) -> Self {
        self.config.medium_max_edge = edge;
        self
    }

    /// Set the number of thumbnail workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Enable or disable the thumbnail stage
    pub fn generate_thumbnails(mut self, enabled: bool) -> Self {
        self.config.generate_thumbnails = enabled;
        self
    }

    /// Set the external tool timeout
    pub fn subprocess_timeout(mut self, timeout: Duration) -> Self {
        self.config.subprocess_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the ffmpeg executable
    pub fn ffmpeg_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.ffmpeg_bin = bin.into();
        self
    }

    /// Set the ffprobe executable
    pub fn ffprobe_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.ffprobe_bin = bin.into();
        self
    }

    /// Set the JPEG quality
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Enable or disable progress output
    pub fn progress(mut self, enabled: bool) -> Self {
        self.config.progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
