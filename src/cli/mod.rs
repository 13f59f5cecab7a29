//! # CLI Module
//!
//! Command-line interface for the capture resolution engine.
//!
//! ## Usage
//! ```bash
//! # Ingest captures from one camera
//! trailcam-dedup ingest --device cam-01 DCIM/100MEDIA/*.JPG
//!
//! # Resolve everything still pending
//! trailcam-dedup process
//!
//! # Preview a full re-run for one camera
//! trailcam-dedup process --device cam-01 --reset --dry-run
//!
//! # Clear a false positive
//! trailcam-dedup not-duplicate 42
//!
//! # JSON listings
//! trailcam-dedup duplicates --output json
//! ```

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use trailcam_dedup::core::batch::{BatchCoordinator, BatchOptions, BatchReport};
use trailcam_dedup::core::config::EngineConfig;
use trailcam_dedup::core::metadata::extract_capture_time;
use trailcam_dedup::core::pipeline::{CancellationToken, FsMediaSource, Pipeline, RecordOutcome};
use trailcam_dedup::core::record::{DeviceId, MediaRecord, NewMediaRecord, RecordFilter, RecordId};
use trailcam_dedup::core::reporter::{
    burst_groups, duplicate_pairs, export_bursts_csv, export_duplicates_csv, BurstGroupReport,
    DuplicatePair,
};
use trailcam_dedup::core::resolver::DuplicateVerdict;
use trailcam_dedup::core::store::SqliteStore;
use trailcam_dedup::error::{HashError, ReportError, Result};
use trailcam_dedup::events::{BatchEvent, Event, EventChannel};

/// Trail camera dedup - duplicate and burst detection for field captures
#[derive(Parser, Debug)]
#[command(name = "trailcam-dedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Record database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON engine config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Near-duplicate cutoff (Hamming distance, 1-64)
    #[arg(long, global = true)]
    threshold: Option<u32>,

    /// Near-duplicate upload window in seconds
    #[arg(long, global = true)]
    near_window: Option<i64>,

    /// Burst capture window in seconds
    #[arg(long, global = true)]
    burst_window: Option<i64>,

    /// Worker threads for batch runs (0 = one per core)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest media files from one device and resolve them
    Ingest {
        /// Device the files came from
        #[arg(short, long)]
        device: String,

        /// Files to ingest, in upload order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Upload time to record (defaults to now)
        #[arg(long)]
        uploaded_at: Option<DateTime<Utc>>,
    },

    /// Reprocess stored records
    Process {
        #[command(flatten)]
        selection: Selection,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Clear duplicate and burst state before reprocessing
        #[arg(long)]
        reset: bool,

        /// Records per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Mark a flagged record as not a duplicate, permanently
    NotDuplicate {
        /// Record id
        id: i64,
    },

    /// List duplicate records next to their canonical record
    Duplicates {
        #[command(flatten)]
        selection: Selection,

        /// Also write the listing as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// List burst groups
    Bursts {
        #[command(flatten)]
        selection: Selection,

        /// Also write the listing as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show record counts
    Stats,
}

/// Device and upload-time selection shared by several commands
#[derive(Args, Debug, Clone)]
struct Selection {
    /// Only this device
    #[arg(short, long)]
    device: Option<String>,

    /// Uploaded at or after (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Uploaded at or before (RFC 3339)
    #[arg(long)]
    to: Option<DateTime<Utc>>,
}

impl Selection {
    fn filter(&self) -> RecordFilter {
        let mut filter = RecordFilter::all().uploaded_between(self.from, self.to);
        if let Some(ref device) = self.device {
            filter = filter.device(DeviceId::new(device.as_str()));
        }
        filter
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (ids only)
    Minimal,
}

/// Run the CLI
pub fn run() -> Result<()> {
    trailcam_dedup::init_tracing();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let db_path = cli.db.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trailcam-dedup")
            .join("records.db")
    });
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let pipeline = Pipeline::builder()
        .config(config)
        .store(store)
        .source(Arc::new(FsMediaSource::new()))
        .build()?;

    let term = Term::stderr();
    match cli.command {
        Commands::Ingest {
            device,
            files,
            uploaded_at,
        } => run_ingest(&term, &pipeline, DeviceId::new(device), &files, uploaded_at, cli.output),
        Commands::Process {
            selection,
            dry_run,
            reset,
            batch_size,
        } => {
            let mut options = BatchOptions::new().dry_run(dry_run).reset(reset);
            options.filter = selection.filter();
            if let Some(size) = batch_size {
                options = options.batch_size(size);
            }
            run_process(&term, pipeline, &options, cli.output)
        }
        Commands::NotDuplicate { id } => {
            let record = pipeline.mark_not_duplicate(RecordId(id))?;
            print_record(&term, &record, cli.output)
        }
        Commands::Duplicates { selection, csv } => {
            let pairs = duplicate_pairs(pipeline.store().as_ref(), &selection.filter())?;
            if let Some(path) = csv {
                write_csv(&path, |w| export_duplicates_csv(&pairs, w))?;
            }
            print_duplicates(&term, &pairs, cli.output)
        }
        Commands::Bursts { selection, csv } => {
            let groups = burst_groups(pipeline.store().as_ref(), &selection.filter())?;
            if let Some(path) = csv {
                write_csv(&path, |w| export_bursts_csv(&groups, w))?;
            }
            print_bursts(&term, &groups, cli.output)
        }
        Commands::Stats => {
            let stats = pipeline.store().stats()?;
            match cli.output {
                OutputFormat::Json => print_json(&stats),
                _ => {
                    term.write_line(&format!(
                        "  {} records, {} duplicates, {} burst groups, {} pending, {} overridden",
                        style(stats.total_records).cyan(),
                        style(stats.duplicates).yellow(),
                        style(stats.burst_groups).cyan(),
                        style(stats.unresolved).dim(),
                        style(stats.overridden).dim()
                    ))
                    .ok();
                    Ok(())
                }
            }
        }
    }
}

/// File config first, then command-line overrides
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match cli.config {
        Some(ref path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config = config.near_duplicate_threshold(threshold);
    }
    if let Some(secs) = cli.near_window {
        config = config.near_duplicate_window_secs(secs);
    }
    if let Some(secs) = cli.burst_window {
        config = config.burst_window_secs(secs);
    }
    if let Some(workers) = cli.workers {
        config = config.workers(workers);
    }
    config.validate()?;
    Ok(config)
}

fn run_ingest(
    term: &Term,
    pipeline: &Pipeline,
    device: DeviceId,
    files: &[PathBuf],
    uploaded_at: Option<DateTime<Utc>>,
    output: OutputFormat,
) -> Result<()> {
    let progress = progress_bar(output, files.len() as u64);
    let mut ingested: Vec<(MediaRecord, RecordOutcome)> = Vec::with_capacity(files.len());

    for path in files {
        let bytes = std::fs::read(path).map_err(|e| HashError::Io {
            location: path.display().to_string(),
            source: e,
        })?;
        let location = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.clone())
            .display()
            .to_string();

        let mut new = NewMediaRecord::new(device.clone(), location, uploaded_at.unwrap_or_else(Utc::now));
        if let Some(captured) = extract_capture_time(&bytes) {
            new = new.captured_at(captured);
        }

        ingested.push(pipeline.ingest(new, &bytes)?);
        if let Some(ref pb) = progress {
            pb.inc(1);
        }
    }
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    match output {
        OutputFormat::Json => {
            let records: Vec<&MediaRecord> = ingested.iter().map(|(r, _)| r).collect();
            print_json(&records)
        }
        OutputFormat::Minimal => {
            for (record, _) in &ingested {
                println!("{}", record.id);
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            for (record, outcome) in &ingested {
                term.write_line(&format!(
                    "  {} {} {}",
                    style(format!("#{}", record.id)).bold(),
                    record.location,
                    describe_outcome(outcome)
                ))
                .ok();
            }
            Ok(())
        }
    }
}

fn run_process(
    term: &Term,
    pipeline: Pipeline,
    options: &BatchOptions,
    output: OutputFormat,
) -> Result<()> {
    let coordinator = BatchCoordinator::new(pipeline);
    let (sender, receiver) = EventChannel::new();

    let progress = progress_bar(output, 0);
    let progress_clone = progress.clone();

    // Handle events in a separate thread
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(ref pb) = progress_clone else {
                continue;
            };
            match event {
                Event::Batch(BatchEvent::Started { to_process, .. }) => {
                    pb.set_length(to_process as u64);
                }
                Event::Batch(BatchEvent::Progress(p)) => {
                    pb.set_position(p.processed as u64);
                    pb.set_message(format!("batch {}/{}", p.batch, p.batches));
                }
                Event::Batch(BatchEvent::Completed { .. }) => pb.finish_and_clear(),
                _ => {}
            }
        }
    });

    let report = coordinator.run_with_events(options, &sender, &CancellationToken::new());

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    let report = report?;

    match output {
        OutputFormat::Pretty => {
            print_pretty_report(term, &report);
            Ok(())
        }
        OutputFormat::Json => print_json(&report),
        OutputFormat::Minimal => {
            for outcome in report.outcomes.iter().filter(|o| o.newly_duplicate) {
                println!("{}", outcome.record);
            }
            Ok(())
        }
    }
}

fn print_pretty_report(term: &Term, report: &BatchReport) {
    let summary = &report.summary;
    let heading = if report.dry_run {
        style("Dry run complete (nothing written)").yellow().bold()
    } else if report.cancelled {
        style("Run cancelled").red().bold()
    } else {
        style("Run complete").green().bold()
    };

    term.write_line("").ok();
    term.write_line(&format!("{} {}", style("✓").green().bold(), heading)).ok();
    term.write_line("").ok();
    term.write_line(&format!(
        "  {} records processed in {:.1}s",
        style(summary.processed).cyan(),
        summary.elapsed_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!("  {} new duplicates", style(summary.new_duplicates).yellow())).ok();
    term.write_line(&format!("  {} new burst groups", style(summary.new_burst_groups).cyan())).ok();
    if summary.skipped > 0 {
        term.write_line(&format!("  {} already resolved", style(summary.skipped).dim())).ok();
    }
    if summary.failures > 0 {
        term.write_line(&format!("  {} failures", style(summary.failures).red())).ok();
        for failure in &report.failures {
            term.write_line(&format!("    #{} {}", failure.record, style(&failure.message).dim()))
                .ok();
        }
    }
}

fn print_record(term: &Term, record: &MediaRecord, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => print_json(record),
        OutputFormat::Minimal => {
            println!("{}", record.id);
            Ok(())
        }
        OutputFormat::Pretty => {
            term.write_line(&format!(
                "{} Record #{} is no longer a duplicate",
                style("✓").green().bold(),
                record.id
            ))
            .ok();
            Ok(())
        }
    }
}

fn print_duplicates(term: &Term, pairs: &[DuplicatePair], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => print_json(&pairs),
        OutputFormat::Minimal => {
            for pair in pairs {
                println!("{} {}", pair.duplicate, pair.canonical);
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            if pairs.is_empty() {
                term.write_line(&format!("  {} No duplicates found", style("✓").green())).ok();
                return Ok(());
            }
            for pair in pairs {
                term.write_line(&format!(
                    "  {} {} {}",
                    style(format!("#{}", pair.duplicate)).bold(),
                    style(&pair.device).dim(),
                    pair.duplicate_location
                ))
                .ok();
                term.write_line(&format!("    {}", style(&pair.explanation).yellow())).ok();
            }
            Ok(())
        }
    }
}

fn print_bursts(term: &Term, groups: &[BurstGroupReport], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => print_json(&groups),
        OutputFormat::Minimal => {
            for group in groups {
                let ids: Vec<String> = group.members.iter().map(|m| m.record.to_string()).collect();
                println!("{} {}", group.group_id, ids.join(","));
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            for group in groups {
                term.write_line(&format!(
                    "  {} {} ({} captures over {:.1}s)",
                    style(&group.group_id).bold(),
                    style(&group.device).dim(),
                    group.members.len(),
                    group.span_ms() as f64 / 1000.0
                ))
                .ok();
                for member in &group.members {
                    let marker = if member.is_duplicate {
                        style("○").dim().to_string()
                    } else {
                        style("●").green().to_string()
                    };
                    term.write_line(&format!(
                        "    {} {:>3} #{} {}",
                        marker, member.sequence, member.record, member.location
                    ))
                    .ok();
                }
            }
            Ok(())
        }
    }
}

fn describe_outcome(outcome: &RecordOutcome) -> String {
    let duplicate = match outcome.verdict {
        DuplicateVerdict::Duplicate { canonical, matched } => {
            style(format!("duplicate of #{} ({})", canonical, matched)).yellow().to_string()
        }
        DuplicateVerdict::NotDuplicate => style("unique").green().to_string(),
        DuplicateVerdict::Unknown => style("pending").dim().to_string(),
    };
    match outcome.burst {
        Some(ref burst) => format!("{}, burst {} #{}", duplicate, burst.group_id, burst.sequence),
        None => duplicate,
    }
}

fn progress_bar(output: OutputFormat, len: u64) -> Option<ProgressBar> {
    if !matches!(output, OutputFormat::Pretty) {
        return None;
    }
    let pb = ProgressBar::new(len);
    if let Ok(template) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(template.progress_chars("█▓░"));
    }
    Some(pb)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ReportError::Serialize(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

fn write_csv(
    path: &Path,
    export: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let to_report_error = |source| ReportError::Export {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_report_error)?;
    let mut writer = BufWriter::new(file);
    export(&mut writer).map_err(to_report_error)?;
    Ok(())
}
