//! Thumbnail cache generation
//!
//! Each candidate file gets two renditions, "thumb" and "medium", written
//! under `<cache root>/<size class>/` at the file's path relative to the
//! media root. Every (file, size class) pair is an independent unit on a
//! fixed-size rayon pool; a failing unit is logged and counted, nothing
//! more.

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, Frame, GenericImageView, ImageFormat, ImageReader};
use rayon::prelude::*;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanErrorKind};
use crate::extractor::Candidate;
use crate::media_tool::MediaTool;
use crate::models::{FileType, SizeClass, ThumbnailSummary};
use crate::scanner::CancelToken;

/// Extension of every video rendition
pub const VIDEO_RENDITION_EXT: &str = "jpg";

/// GIF quantizer speed (1 = best, 30 = fastest); NeuQuant builds a 256-colour palette
const GIF_SPEED: i32 = 10;

/// Whether the cache can be written this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCapability {
    /// Cache root and both size-class roots exist and accept files
    Writable(PathBuf),
    /// Thumbnail stage must be skipped
    NotWritable {
        /// Cache root that was checked
        root: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

impl CacheCapability {
    /// Whether renditions can be written
    pub fn is_writable(&self) -> bool {
        matches!(self, CacheCapability::Writable(_))
    }
}

/// Create the cache tree and prove it accepts new files
pub fn check_cache_dir(config: &ScanConfig) -> CacheCapability {
    let root = config.cache_root();
    let mut dirs = vec![root.clone()];
    dirs.extend(SizeClass::ALL.iter().map(|c| config.size_class_root(*c)));

    for dir in &dirs {
        if let Err(e) = std::fs::create_dir_all(dir) {
            return CacheCapability::NotWritable {
                root,
                reason: format!("cannot create {}: {}", dir.display(), e),
            };
        }
        if let Err(e) = tempfile::NamedTempFile::new_in(dir) {
            return CacheCapability::NotWritable {
                root,
                reason: format!("cannot write into {}: {}", dir.display(), e),
            };
        }
    }

    CacheCapability::Writable(root)
}

/// Encoder selected from a rendition's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy, quality-controlled
    Jpeg,
    /// Lossless, best compression
    Png,
    /// Indexed colour
    Gif,
    /// Uncompressed bitmap
    Bmp,
    /// Tagged image file
    Tiff,
}

impl OutputFormat {
    /// Map a lowercase extension to its encoder
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" | "jpe" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "bmp" => Some(OutputFormat::Bmp),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }

    /// Format of an output path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| Self::from_extension(&e.to_lowercase()))
    }
}

/// Cache path of `source` for `class`
///
/// Images keep their (lowercased) extension. Videos become
/// `<stem>.<ext>.jpg` so `clip.mp4` and `clip.mov` never collide.
pub fn rendition_path(
    media_root: &Path,
    cache_root: &Path,
    source: &Path,
    class: SizeClass,
) -> Result<PathBuf, ScanError> {
    let rel = source.strip_prefix(media_root).map_err(|_| {
        ScanError::new(
            ScanErrorKind::InvalidConfig,
            Some(source.to_path_buf()),
            format!("not under media root {}", media_root.display()),
        )
    })?;

    let ext = rel
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let rel_out = match FileType::from_extension(&ext) {
        FileType::Image => rel.with_extension(&ext),
        FileType::Video => {
            let stem = rel
                .file_stem()
                .ok_or_else(|| ScanError::unsupported(source.to_path_buf()))?;
            let mut name = OsString::from(stem);
            name.push(".");
            name.push(&ext);
            name.push(".");
            name.push(VIDEO_RENDITION_EXT);
            rel.with_file_name(name)
        }
        FileType::Text | FileType::Other => {
            return Err(ScanError::unsupported(source.to_path_buf()))
        }
    };

    Ok(cache_root.join(class.as_str()).join(rel_out))
}

/// Fit `(w, h)` so its longest edge equals `bound`, keeping aspect ratio
pub fn fit_within((w, h): (u32, u32), bound: u32) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (w, h);
    }
    let scaled = |short: u32, long: u32| -> u32 {
        let v = (short as u64 * bound as u64 + long as u64 / 2) / long as u64;
        (v as u32).max(1)
    };
    if w >= h {
        (bound, scaled(h, w))
    } else {
        (scaled(w, h), bound)
    }
}

/// Pixel size of a rendition
///
/// `actual` is the decoded input, `original` the source's known size (absent
/// when a video probe failed, which forces scaling).
pub fn target_dimensions(
    actual: (u32, u32),
    original: Option<(u32, u32)>,
    bound: u32,
    class: SizeClass,
) -> (u32, u32) {
    let should_scale = match class {
        SizeClass::Thumb => true,
        SizeClass::Medium => original.map_or(true, |(w, h)| w.max(h) > bound),
    };
    if should_scale {
        fit_within(actual, bound)
    } else {
        actual
    }
}

/// Write `img` to `output` with format-specific settings
pub fn encode(img: &DynamicImage, output: &Path, jpeg_quality: u8) -> Result<(), ScanError> {
    let format = OutputFormat::from_path(output).ok_or_else(|| ScanError::unsupported(output.to_path_buf()))?;

    let file = File::create(output).map_err(|e| ScanError::from(e).with_path(output))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel. The encoder is baseline only, so a
            // progressive source yields a baseline rendition
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, jpeg_quality))?;
        }
        OutputFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut writer, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        OutputFormat::Gif => {
            let mut encoder = GifEncoder::new_with_speed(&mut writer, GIF_SPEED);
            encoder.encode_frame(Frame::new(img.to_rgba8()))?;
        }
        OutputFormat::Bmp => img.write_to(&mut writer, ImageFormat::Bmp)?,
        OutputFormat::Tiff => img.write_to(&mut writer, ImageFormat::Tiff)?,
    }

    writer.flush().map_err(|e| ScanError::from(e).with_path(output))?;
    Ok(())
}

fn decode(path: &Path) -> Result<DynamicImage, ScanError> {
    // Sniff the header; extensions like .jpe are not always recognised
    let img = ImageReader::open(path)
        .map_err(|e| ScanError::from(e).with_path(path))?
        .with_guessed_format()
        .map_err(|e| ScanError::from(e).with_path(path))?
        .decode()
        .map_err(|e| ScanError::from(e).with_path(path))?;
    Ok(img)
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionJob {
    /// Source file
    pub source: PathBuf,
    /// Image or video
    pub file_type: FileType,
    /// Target tier
    pub class: SizeClass,
}

/// How a single unit ended
#[derive(Debug)]
pub enum UnitOutcome {
    /// Rendition written at the path
    Written(PathBuf),
    /// Unit failed; sibling units are unaffected
    Failed(ScanError),
    /// Unit never started because the scan was cancelled
    Cancelled,
}

/// Rendition writer backed by a bounded worker pool
pub struct ThumbnailGenerator {
    pool: rayon::ThreadPool,
    tool: MediaTool,
    media_root: PathBuf,
    cache_root: PathBuf,
    thumb_max_edge: u32,
    medium_max_edge: u32,
    jpeg_quality: u8,
    scratch_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ThumbnailGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailGenerator")
            .field("workers", &self.pool.current_num_threads())
            .field("cache_root", &self.cache_root)
            .finish()
    }
}

impl ThumbnailGenerator {
    /// Build the worker pool for a pass
    pub fn new(config: &ScanConfig, tool: MediaTool) -> Result<Self, ScanError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_workers())
            .thread_name(|i| format!("thumb-{i}"))
            .build()
            .map_err(|e| ScanError::new(ScanErrorKind::Unknown, None, e.to_string()))?;

        Ok(Self {
            pool,
            tool,
            media_root: config.media_root.clone(),
            cache_root: config.cache_root(),
            thumb_max_edge: config.thumb_max_edge,
            medium_max_edge: config.medium_max_edge,
            jpeg_quality: config.jpeg_quality,
            scratch_dir: None,
        })
    }

    /// Put extracted video frames under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn max_edge(&self, class: SizeClass) -> u32 {
        match class {
            SizeClass::Thumb => self.thumb_max_edge,
            SizeClass::Medium => self.medium_max_edge,
        }
    }

    /// Cache path a job writes to
    pub fn output_path(&self, job: &RenditionJob) -> Result<PathBuf, ScanError> {
        rendition_path(&self.media_root, &self.cache_root, &job.source, job.class)
    }

    /// Expand candidates into one job per size class
    pub fn plan(candidates: &[Candidate]) -> Vec<RenditionJob> {
        candidates
            .iter()
            .filter(|c| c.file_type.is_candidate())
            .flat_map(|c| {
                SizeClass::ALL.iter().map(move |class| RenditionJob {
                    source: c.path.clone(),
                    file_type: c.file_type,
                    class: *class,
                })
            })
            .collect()
    }

    /// Split jobs into runnable ones and ones whose output path is already
    /// claimed by an earlier job
    ///
    /// `clip.mp4` and `clip.mp4.jpg`, or `p.JPG` and `p.jpg`, share a cache
    /// path. Only the first claimant is kept so no two units write one file.
    pub fn claim_outputs(&self, jobs: Vec<RenditionJob>) -> (Vec<RenditionJob>, Vec<RenditionJob>) {
        let mut claimed = HashSet::new();
        let mut runnable = Vec::with_capacity(jobs.len());
        let mut conflicts = Vec::new();
        for job in jobs {
            match self.output_path(&job) {
                Ok(path) if !claimed.insert(path.clone()) => conflicts.push(job),
                // Unmappable paths still run and fail on their own
                _ => runnable.push(job),
            }
        }
        (runnable, conflicts)
    }

    /// Produce one rendition; a partial output is removed on failure
    pub fn render(&self, job: &RenditionJob) -> Result<PathBuf, ScanError> {
        let output = self.output_path(job)?;
        match self.render_to(job, &output) {
            Ok(()) => Ok(output),
            Err(e) => {
                if output.exists() {
                    if let Err(rm) = std::fs::remove_file(&output) {
                        log::warn!("Could not remove partial {}: {}", output.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    fn render_to(&self, job: &RenditionJob, output: &Path) -> Result<(), ScanError> {
        let (img, original) = match job.file_type {
            FileType::Image => {
                let img = decode(&job.source)?;
                let dims = img.dimensions();
                (img, Some(dims))
            }
            FileType::Video => self.load_video_frame(&job.source)?,
            FileType::Text | FileType::Other => {
                return Err(ScanError::unsupported(job.source.clone()))
            }
        };

        let actual = img.dimensions();
        let (w, h) = target_dimensions(actual, original, self.max_edge(job.class), job.class);
        let img = if (w, h) == actual {
            img
        } else {
            img.resize_exact(w, h, FilterType::Lanczos3)
        };

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScanError::from(e).with_path(parent))?;
        }
        encode(&img, output, self.jpeg_quality).map_err(|e| e.with_path(output))
    }

    /// First frame of a video plus its probed size
    fn load_video_frame(
        &self,
        video: &Path,
    ) -> Result<(DynamicImage, Option<(u32, u32)>), ScanError> {
        let original = match self.tool.probe_dimensions(video) {
            Ok(dims) => Some(dims),
            Err(e) => {
                log::warn!(
                    "Probe failed for {}, scaling unconditionally: {}",
                    video.display(),
                    e.message
                );
                None
            }
        };

        // Dropping the TempDir removes the frame on every path out of here
        let mut builder = tempfile::Builder::new();
        builder.prefix("media-frame-");
        let scratch = match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| ScanError::from(e).with_path(video))?;

        let frame = scratch.path().join("frame.png");
        self.tool.extract_frame(video, &frame)?;
        let img = decode(&frame)?;
        Ok((img, original))
    }

    fn run_unit(&self, job: &RenditionJob, cancel: &CancelToken) -> UnitOutcome {
        if cancel.is_cancelled() {
            return UnitOutcome::Cancelled;
        }
        match catch_unwind(AssertUnwindSafe(|| self.render(job))) {
            Ok(Ok(path)) => UnitOutcome::Written(path),
            Ok(Err(e)) => UnitOutcome::Failed(e),
            Err(_) => UnitOutcome::Failed(ScanError::new(
                ScanErrorKind::Unknown,
                Some(job.source.clone()),
                "rendition task panicked",
            )),
        }
    }

    /// Run every job on the pool and return outcomes in job order
    pub fn run(&self, jobs: &[RenditionJob], cancel: &CancelToken) -> Vec<UnitOutcome> {
        self.pool
            .install(|| jobs.par_iter().map(|job| self.run_unit(job, cancel)).collect())
    }

    /// Render both size classes for every candidate
    pub fn generate(&self, candidates: &[Candidate], cancel: &CancelToken) -> ThumbnailSummary {
        let (jobs, conflicts) = self.claim_outputs(Self::plan(candidates));
        let outcomes = self.run(&jobs, cancel);

        let mut summary = ThumbnailSummary {
            scheduled: jobs.len() + conflicts.len(),
            failed: conflicts.len(),
            ..Default::default()
        };
        for job in &conflicts {
            log::error!(
                "[Thumb] {} rendition skipped: {} shares its cache path with another file",
                job.class,
                job.source.display()
            );
        }
        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                UnitOutcome::Written(path) => {
                    log::debug!("{} rendition written: {}", job.class, path.display());
                    summary.succeeded += 1;
                }
                UnitOutcome::Failed(e) => {
                    log::error!(
                        "[Thumb] {} rendition failed: {} -> {}",
                        job.class,
                        job.source.display(),
                        e
                    );
                    summary.failed += 1;
                }
                UnitOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}
