//! Metadata extraction for one top-level folder
//!
//! Walks the folder recursively, classifies each file, hashes it and reads
//! image dimensions. A failure on one file is logged and counted; it never
//! aborts the folder.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanErrorKind};
use crate::models::{FileRecord, FileType, UNKNOWN_HASH};
use crate::scanner::CancelToken;

/// Read size for streaming hashes (64 KiB)
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// A file eligible for cached renditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path of the source file
    pub path: PathBuf,
    /// Image or video
    pub file_type: FileType,
}

/// Everything one folder walk produced
#[derive(Debug, Default)]
pub struct FolderExtraction {
    /// One record per readable file
    pub records: Vec<FileRecord>,
    /// Images and videos, in walk order
    pub candidates: Vec<Candidate>,
    /// Files or entries that could not be indexed
    pub failures: usize,
    /// The walk stopped early because of cancellation
    pub cancelled: bool,
}

/// Classify a file by its lowercased extension
pub fn classify(path: &Path) -> FileType {
    FileType::from_path(path)
}

/// Streaming MD5 of a whole file, lowercase hex
pub fn compute_file_hash(path: &Path) -> Result<String, ScanError> {
    use md5::{Digest, Md5};

    let file = File::open(path).map_err(|e| hash_error(path, e))?;
    let mut reader = BufReader::with_capacity(HASH_CHUNK_SIZE, file);
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buffer).map_err(|e| hash_error(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_error(path: &Path, err: std::io::Error) -> ScanError {
    ScanError::new(ScanErrorKind::HashError, Some(path.to_path_buf()), err.to_string())
}

/// Image dimensions from the file header, without a full decode
pub fn image_size(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(dims) => Some(dims),
        Err(e) => {
            log::warn!("Could not read image size {}: {}", path.display(), e);
            None
        }
    }
}

/// Build the record for one file
pub fn process_file(path: &Path, folder_name: &str) -> Result<FileRecord, ScanError> {
    let metadata = std::fs::metadata(path).map_err(|e| ScanError::from(e).with_path(path))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ScanError::new(
                ScanErrorKind::Unknown,
                Some(path.to_path_buf()),
                "file name is not valid UTF-8",
            )
        })?
        .to_string();

    let file_type = classify(path);
    let (width, height) = match file_type {
        FileType::Image => match image_size(path) {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        },
        _ => (None, None),
    };

    // Unreadable content still gets a record
    let content_hash = match compute_file_hash(path) {
        Ok(hash) => hash,
        Err(e) => {
            log::warn!("Hash failed for {}: {}", path.display(), e.message);
            UNKNOWN_HASH.to_string()
        }
    };

    Ok(FileRecord {
        file_path: path.to_string_lossy().to_string(),
        root_folder: folder_name.to_string(),
        file_name,
        file_type,
        file_size: metadata.len(),
        content_hash,
        width,
        height,
    })
}

fn is_pruned(entry: &DirEntry, config: &ScanConfig) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| config.should_ignore_dir(name))
}

/// Walk `folder_path` and build records for every file beneath it
pub fn extract_folder(
    config: &ScanConfig,
    folder_path: &Path,
    folder_name: &str,
    cancel: &CancelToken,
) -> FolderExtraction {
    let mut out = FolderExtraction::default();

    let walker = WalkDir::new(folder_path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_pruned(e, config));

    for entry in walker {
        if cancel.is_cancelled() {
            out.cancelled = true;
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                log::error!("Failed to read entry {}: {}", path, e);
                out.failures += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        match process_file(path, folder_name) {
            Ok(record) => {
                log::debug!("Indexed {}", record.file_path);
                if record.file_type.is_candidate() {
                    out.candidates.push(Candidate {
                        path: path.to_path_buf(),
                        file_type: record.file_type,
                    });
                }
                out.records.push(record);
            }
            Err(e) => {
                log::error!("Failed to process file {}: {}", path.display(), e.message);
                out.failures += 1;
            }
        }
    }

    out
}
