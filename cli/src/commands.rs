use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fire_bulk::db::{file_repo, stats_repo, FileFilter};
use fire_bulk::pipeline::{BroadcastProgress, FnProgress, ProgressEvent, ProgressKind};
use fire_bulk::{
    load_config, BatchOutcome, BatchProcessor, BatchProgressBroadcaster, CodeDictionary,
    Completeness, Config, Database, DirectoryScanner, PipelineConfig, PreparedBatch, QuarterKey,
    QuarterOrganizer, Telemetry,
};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;

pub struct Context {
    config: Config,
    db: Database,
    telemetry: Telemetry,
}

impl Context {
    pub fn open(config_path: Option<&Path>, db_path: Option<&Path>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => load_config(path).map_err(CliError::lib)?,
            None => Config::default(),
        };
        let db_path = match db_path {
            Some(path) => path.to_path_buf(),
            None => config
                .resolved_database_path()
                .ok_or(CliError::NoDatabasePath)?,
        };
        let db = Database::open(&db_path).map_err(CliError::lib)?;
        Ok(Self {
            config,
            db,
            telemetry: Telemetry::current(),
        })
    }
}

pub struct ProcessArgs {
    pub dir: PathBuf,
    pub quarter: String,
    pub resume: bool,
    pub retry_failed: bool,
    pub rssd: Option<String>,
    pub output: Option<PathBuf>,
    pub time_budget: Option<u64>,
    pub events: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_quarter(raw: Option<&str>) -> Result<Option<QuarterKey>, CliError> {
    raw.map(|q| q.parse::<QuarterKey>().map_err(CliError::lib))
        .transpose()
}

pub fn scan(ctx: &Context, dir: &Path) -> Result<ExitCode, CliError> {
    let scanner = DirectoryScanner::new(
        ctx.db.clone(),
        ctx.config.scan.workers,
        ctx.telemetry.clone(),
    )
    .with_expected_schedules(ctx.config.expected_schedules.clone());
    let report = scanner.scan(dir).map_err(CliError::lib)?;

    let quarters: Vec<_> = report
        .quarters
        .iter()
        .map(|(quarter, files)| {
            let present: Vec<&str> = files.iter().map(|f| f.schedule_code.as_str()).collect();
            json!({
                "quarter": quarter,
                "files": files.len(),
                "completeness": Completeness::evaluate(&ctx.config.expected_schedules, &present),
            })
        })
        .collect();

    print_json(&json!({
        "directory": report.directory,
        "files": report.file_count(),
        "inserted": report.inserted,
        "changed": report.changed,
        "unchanged": report.unchanged,
        "skipped": report.skipped,
        "quarters": quarters,
    }))?;
    Ok(ExitCode::SUCCESS)
}

pub fn process(ctx: &Context, args: ProcessArgs) -> Result<ExitCode, CliError> {
    let quarter: QuarterKey = args.quarter.parse().map_err(CliError::lib)?;

    let mut pipeline = PipelineConfig::from_config(&ctx.config);
    if let Some(secs) = args.time_budget {
        pipeline = pipeline.with_time_budget(Duration::from_secs(secs));
    }

    let organizer = QuarterOrganizer::new(ctx.db.clone(), &pipeline, ctx.telemetry.clone());
    let batch = organizer
        .prepare_batch(quarter, &args.dir, args.resume, args.retry_failed)
        .map_err(CliError::lib)?;

    if batch.is_empty() {
        print_json(&summary(&batch, &BatchOutcome::default(), None))?;
        return Ok(ExitCode::SUCCESS);
    }

    let dictionary = CodeDictionary::load(&ctx.config.dictionary).map_err(CliError::lib)?;
    let processor = BatchProcessor::new(
        ctx.db.clone(),
        Arc::new(dictionary),
        &pipeline,
        ctx.telemetry.clone(),
    )
    .map_err(CliError::lib)?;

    let stop = processor.stop_handle();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current file");
        stop.store(true, Ordering::SeqCst);
    })?;

    let rssd = args.rssd.as_deref();
    let outcome = if args.events {
        run_with_event_stream(&processor, &batch, rssd)?
    } else {
        processor
            .process_prepared(&batch, rssd, &FnProgress(log_progress))
            .map_err(CliError::lib)?
    };

    if let Some(id) = rssd {
        if !outcome.filter_misses.is_empty() && outcome.record_count() == 0 {
            warn!("RSSD ID {} was not found in any processed schedule", id.trim());
        }
    }

    let written = match &args.output {
        Some(path) => Some(write_records(path, &outcome)?),
        None => None,
    };

    print_json(&summary(&batch, &outcome, written))?;

    if outcome.failed_files.is_empty() && !outcome.cancelled {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn log_progress(event: &ProgressEvent) {
    match &event.kind {
        ProgressKind::Started | ProgressKind::ScheduleSkipped => {}
        ProgressKind::ScheduleFailed { .. } => warn!(
            "[{}/{}] {}",
            event.current_file, event.total_files, event.message
        ),
        _ => info!(
            "[{}/{}] {:.0}% {}",
            event.current_file, event.total_files, event.percentage, event.message
        ),
    }
}

/// Runs the batch while a separate thread prints every broadcast event as
/// one JSON line on stderr.
fn run_with_event_stream(
    processor: &BatchProcessor,
    batch: &PreparedBatch,
    rssd: Option<&str>,
) -> Result<BatchOutcome, CliError> {
    let broadcaster = BatchProgressBroadcaster::default();
    let mut events = broadcaster.subscribe();

    let printer = thread::Builder::new()
        .name("progress-events".into())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(event) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        eprintln!("{}", line);
                    }
                    if event.batch_complete {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Progress stream dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        })
        .map_err(CliError::Thread)?;

    // The reporter owns the only sender; dropping it closes the stream.
    let result = {
        let reporter = BroadcastProgress::new(broadcaster);
        processor.process_prepared(batch, rssd, &reporter)
    };
    if printer.join().is_err() {
        warn!("Progress event thread panicked");
    }
    result.map_err(CliError::lib)
}

fn write_records(path: &Path, outcome: &BatchOutcome) -> Result<usize, CliError> {
    let io_err = |source| CliError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    let mut written = 0;
    for schedule in outcome.records_by_schedule.values() {
        for record in &schedule.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n").map_err(io_err)?;
            written += 1;
        }
    }
    writer.flush().map_err(io_err)?;
    info!("Wrote {} records to {}", written, path.display());
    Ok(written)
}

fn summary(
    batch: &PreparedBatch,
    outcome: &BatchOutcome,
    written: Option<usize>,
) -> serde_json::Value {
    let schedules: Vec<_> = outcome
        .records_by_schedule
        .values()
        .map(|s| {
            json!({
                "scheduleCode": s.schedule_code,
                "scheduleName": s.schedule_name,
                "sourceFile": s.source_file,
                "records": s.records.len(),
                "stats": s.stats,
            })
        })
        .collect();

    json!({
        "batchId": outcome.batch_id,
        "quarter": batch.quarter,
        "mode": batch.mode,
        "selectedFiles": batch.files.len(),
        "resetFailed": batch.reset_failed,
        "requeued": batch.requeued,
        "completeness": batch.completeness,
        "completed": outcome.completed,
        "skipped": outcome.skipped,
        "failed": outcome.failed_files,
        "cancelled": outcome.cancelled,
        "completionPercentage": outcome.completion_percentage(),
        "records": outcome.record_count(),
        "recordsWritten": written,
        "filterMisses": outcome.filter_misses,
        "schedules": schedules,
    })
}

pub fn status(ctx: &Context, quarter: Option<&str>) -> Result<ExitCode, CliError> {
    let quarter = parse_quarter(quarter)?;

    let body = match quarter {
        Some(quarter) => {
            let counts = file_repo::count_by_status(&ctx.db, &FileFilter::quarter(quarter))
                .map_err(CliError::lib)?;
            let counts: std::collections::BTreeMap<&str, u64> =
                counts.iter().map(|(s, n)| (s.as_str(), *n)).collect();
            let files = file_repo::get_by_quarter(&ctx.db, quarter).map_err(CliError::lib)?;
            let present: Vec<&str> = files.iter().map(|f| f.schedule_code.as_str()).collect();
            json!({
                "quarter": quarter,
                "counts": counts,
                "completeness": Completeness::evaluate(&ctx.config.expected_schedules, &present),
            })
        }
        None => {
            let stats = stats_repo::processing_stats(&ctx.db).map_err(CliError::lib)?;
            let runs = stats_repo::recent_runs(&ctx.db, 5).map_err(CliError::lib)?;
            json!({
                "stats": stats,
                "recentRuns": runs,
            })
        }
    };

    print_json(&body)?;
    Ok(ExitCode::SUCCESS)
}

pub fn failed(ctx: &Context, quarter: Option<&str>) -> Result<ExitCode, CliError> {
    let quarter = parse_quarter(quarter)?;
    let failed = file_repo::get_failed(&ctx.db, quarter).map_err(CliError::lib)?;

    let rows: Vec<_> = failed
        .iter()
        .map(|(record, error)| {
            json!({
                "path": record.path,
                "quarter": record.quarter,
                "scheduleCode": record.schedule_code,
                "retryCount": record.retry_count,
                "error": error,
            })
        })
        .collect();

    print_json(&rows)?;
    Ok(ExitCode::SUCCESS)
}

pub fn quarters(ctx: &Context) -> Result<ExitCode, CliError> {
    let quarters = file_repo::available_quarters(&ctx.db).map_err(CliError::lib)?;
    print_json(&quarters)?;
    Ok(ExitCode::SUCCESS)
}

pub fn cleanup(ctx: &Context, days: Option<u32>) -> Result<ExitCode, CliError> {
    let days = days.unwrap_or(ctx.config.retention_days);
    let removed = file_repo::cleanup_completed(&ctx.db, days).map_err(CliError::lib)?;
    info!("Removed {} completed records older than {} days", removed, days);
    print_json(&json!({ "removed": removed, "olderThanDays": days }))?;
    Ok(ExitCode::SUCCESS)
}
