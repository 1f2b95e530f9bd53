//! Media Indexer CLI
//!
//! Incremental indexing of a media root plus thumbnail cache maintenance.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

use media_indexer::{
    ProgressReporter, ScanConfig, ScanDatabase, ScanError, ScanHandle, ScanReport, SortKey,
    SortOrder,
};

const ABOUT: &str = r#"
Media Indexer - incremental media tree indexer

Examples:
  media_indexer scan -r /srv/media                   Index changed folders, refresh thumbnails
  media_indexer scan -r /srv/media --no-thumbs       Index only
  media_indexer scan -r /srv/media --json            JSON report on stdout
  media_indexer list -d media_index.db -f vacation   List a folder's records
"#;

const DEFAULT_DB: &str = "media_index.db";

/// Incremental media tree indexer
#[derive(Parser)]
#[command(name = "media_indexer")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan pass over a media root
    Scan {
        /// Media root; its direct child directories are indexed
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,

        /// SQLite database file
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Thumbnail workers (0 = auto-detect)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Skip the thumbnail stage
        #[arg(long)]
        no_thumbs: bool,

        /// Time budget for one ffprobe/ffmpeg call, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// ffmpeg executable
        #[arg(long)]
        ffmpeg: Option<PathBuf>,

        /// ffprobe executable
        #[arg(long)]
        ffprobe: Option<PathBuf>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Emit JSON-lines progress on stderr
        #[arg(long)]
        progress: bool,
    },

    /// List the records of one top-level folder
    List {
        /// SQLite database file
        #[arg(short = 'd', long, default_value = DEFAULT_DB)]
        db: PathBuf,

        /// Top-level folder name
        #[arg(short = 'f', long)]
        folder: String,

        /// path, name, type or size
        #[arg(long, default_value = "path")]
        sort: String,

        /// Descending order
        #[arg(long)]
        desc: bool,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

struct ScanArgs {
    root: Option<PathBuf>,
    db: Option<PathBuf>,
    workers: Option<usize>,
    no_thumbs: bool,
    timeout_secs: Option<u64>,
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
    config: Option<PathBuf>,
    progress: bool,
}

fn build_config(args: ScanArgs) -> Result<ScanConfig, ScanError> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_json_file(path)?,
        None => ScanConfig::default(),
    };
    if let Some(root) = args.root {
        config.media_root = root;
    }
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.no_thumbs {
        config.generate_thumbnails = false;
    }
    if let Some(secs) = args.timeout_secs {
        config.subprocess_timeout_ms = Duration::from_secs(secs).as_millis() as u64;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg_bin = ffmpeg;
    }
    if let Some(ffprobe) = args.ffprobe {
        config.ffprobe_bin = ffprobe;
    }
    if args.progress {
        config.progress = true;
    }
    if config.media_root.as_os_str().is_empty() {
        return Err(ScanError::invalid_config("no media root given (-r or config file)"));
    }
    Ok(config)
}

fn run_scan(args: ScanArgs) -> Result<ScanReport, ScanError> {
    let config = build_config(args)?;
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));

    info!("Media root: {}", config.media_root.display());
    info!("Database: {}", db_path.display());
    info!(
        "Workers: {}",
        if config.workers == 0 {
            "auto".to_string()
        } else {
            config.workers.to_string()
        }
    );
    info!("Thumbnails: {}", config.generate_thumbnails);

    let store = ScanDatabase::open(&db_path)?;
    let reporter = ProgressReporter::new(config.progress);
    ScanHandle::start(config, Box::new(store), reporter)?.join()
}

fn print_report(report: &ScanReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Could not serialize report: {}", e),
        }
        return;
    }
    println!("Scan completed:");
    println!("  Folders scanned: {}", report.folders_scanned);
    println!("  Folders skipped: {}", report.folders_skipped);
    println!("  Folders vanished: {}", report.folders_vanished);
    println!("  Folders removed: {}", report.folders_removed);
    println!("  Records written: {}", report.records_written);
    println!("  File failures: {}", report.file_failures);
    if report.thumbnails_enabled {
        println!(
            "  Thumbnails: {} scheduled, {} written, {} failed",
            report.thumbnails.scheduled, report.thumbnails.succeeded, report.thumbnails.failed
        );
    } else {
        println!("  Thumbnails: disabled");
    }
    if report.cancelled {
        println!("  Cancelled: yes");
    }
    println!("  Duration: {}ms", report.duration_ms);
}

fn run_list(db: PathBuf, folder: &str, sort: &str, desc: bool, json: bool) -> Result<(), ScanError> {
    let store = ScanDatabase::open(&db)?;
    let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
    let records = store.list_folder_records(folder, SortKey::parse(sort), order)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in &records {
        let dims = match (record.width, record.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "-".to_string(),
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.file_type, record.file_size, dims, record.content_hash, record.file_path
        );
    }
    info!("{} records in {}", records.len(), folder);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Scan {
            root,
            db,
            workers,
            no_thumbs,
            timeout_secs,
            ffmpeg,
            ffprobe,
            config,
            json,
            progress,
        }) => {
            info!("Starting media scan...");
            let args = ScanArgs {
                root,
                db,
                workers,
                no_thumbs,
                timeout_secs,
                ffmpeg,
                ffprobe,
                config,
                progress,
            };
            run_scan(args).map(|report| print_report(&report, json))
        }
        Some(Commands::List {
            db,
            folder,
            sort,
            desc,
            json,
        }) => run_list(db, &folder, &sort, desc, json),
        None => {
            println!("{}", ABOUT);
            println!("Use 'media_indexer scan -h' for scan options");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
