use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::canonical::{Canonicalizer, Conversion, ConversionStats};
use crate::db::stats_repo::{self, BatchRunRow};
use crate::db::{file_repo, Database};
use crate::dictionary::CodeDictionary;
use crate::error::{PipelineError, ReadError};
use crate::model::{CanonicalRecord, FileRecord, FileStatus};
use crate::sanitize::{redact_message, redact_path};
use crate::telemetry::Telemetry;

use super::config::PipelineConfig;
use super::organizer::{BatchMode, PreparedBatch};
use super::progress::{ProgressEvent, ProgressKind, ProgressReporter};

/// Canonical records produced from one schedule file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecords {
    pub schedule_code: String,
    pub schedule_name: String,
    pub source_file: String,
    pub records: Vec<CanonicalRecord>,
    pub stats: ConversionStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub path: PathBuf,
    pub schedule_code: String,
    pub filename: String,
    pub error: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub batch_id: String,
    pub total_files: usize,
    pub records_by_schedule: BTreeMap<String, ScheduleRecords>,
    pub failed_files: Vec<FailedFile>,
    pub completed: usize,
    pub skipped: usize,
    /// Schedules converted under an institution filter that matched no row.
    pub filter_misses: Vec<String>,
    /// Stopped early by the stop flag or the time budget. Files not reached
    /// keep their status.
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn record_count(&self) -> usize {
        self.records_by_schedule
            .values()
            .map(|s| s.records.len())
            .sum()
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total_files as f64 * 100.0
    }
}

/// Labels stored with the run in `batch_runs`.
struct RunLabel {
    quarter: String,
    directory: String,
    mode: BatchMode,
}

impl RunLabel {
    fn infer(files: &[FileRecord], resume_mode: bool) -> Self {
        let quarter = match files.first() {
            Some(first) if files.iter().all(|f| f.quarter == first.quarter) => {
                first.quarter.to_string()
            }
            Some(_) => "mixed".to_string(),
            None => String::new(),
        };
        let directory = files
            .first()
            .and_then(|f| f.path.parent())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            quarter,
            directory,
            mode: if resume_mode {
                BatchMode::Resume
            } else {
                BatchMode::Full
            },
        }
    }
}

/// Batch Processor: converts files one at a time and keeps the ledger in
/// step with every file's outcome.
///
/// Files run sequentially; parallelism lives inside the canonicalizer. A
/// file's failure is recorded and the loop moves on. Only store errors end
/// a batch early.
pub struct BatchProcessor {
    db: Database,
    canonicalizer: Canonicalizer,
    stop: Arc<AtomicBool>,
    time_budget: Option<Duration>,
    telemetry: Telemetry,
}

impl BatchProcessor {
    pub fn new(
        db: Database,
        dictionary: Arc<CodeDictionary>,
        config: &PipelineConfig,
        telemetry: Telemetry,
    ) -> Result<Self, PipelineError> {
        let canonicalizer = Canonicalizer::new(dictionary, &config.convert, telemetry.clone())?;
        Ok(Self {
            db,
            canonicalizer,
            stop: Arc::new(AtomicBool::new(false)),
            time_budget: config.time_budget,
            telemetry: telemetry.for_component("batch"),
        })
    }

    /// Flag that, once set, stops the batch before its next file.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn process_prepared(
        &self,
        batch: &PreparedBatch,
        institution_filter: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchOutcome, PipelineError> {
        let label = RunLabel {
            quarter: batch.quarter.to_string(),
            directory: batch.directory.to_string_lossy().to_string(),
            mode: batch.mode,
        };
        self.run(
            &batch.files,
            institution_filter,
            progress,
            batch.mode.is_resume(),
            label,
        )
    }

    /// Processes `files` in order. A file already `completed` is skipped
    /// unless `resume_mode` is set.
    pub fn process_batch(
        &self,
        files: &[FileRecord],
        institution_filter: Option<&str>,
        progress: &dyn ProgressReporter,
        resume_mode: bool,
    ) -> Result<BatchOutcome, PipelineError> {
        let label = RunLabel::infer(files, resume_mode);
        self.run(files, institution_filter, progress, resume_mode, label)
    }

    fn run(
        &self,
        files: &[FileRecord],
        institution_filter: Option<&str>,
        progress: &dyn ProgressReporter,
        resume_mode: bool,
        label: RunLabel,
    ) -> Result<BatchOutcome, PipelineError> {
        self.telemetry.in_scope(|| -> Result<BatchOutcome, PipelineError> {
            let batch_id = uuid::Uuid::new_v4().to_string();
            let span = info_span!("batch", batch_id = %batch_id, quarter = %label.quarter);
            let _enter = span.enter();

            let started = Instant::now();
            let total = files.len();
            let mut run = BatchRunRow {
                id: batch_id.clone(),
                quarter: label.quarter.clone(),
                directory: label.directory.clone(),
                mode: label.mode.as_str().to_string(),
                started_at: Utc::now(),
                finished_at: None,
                total_files: total as u64,
                completed_files: 0,
                failed_files: 0,
                skipped_files: 0,
                records_emitted: 0,
                cancelled: false,
            };
            stats_repo::record_batch_run(&self.db, &run)?;

            info!("Processing {} files ({})", total, label.mode.as_str());

            let mut outcome = BatchOutcome {
                batch_id: batch_id.clone(),
                total_files: total,
                ..Default::default()
            };

            for (index, file) in files.iter().enumerate() {
                if let Some(reason) = self.stop_reason(started) {
                    warn!("Stopping batch before file {} of {}: {}", index + 1, total, reason);
                    outcome.cancelled = true;
                    break;
                }

                let event = |kind: ProgressKind, message: String, done: usize| ProgressEvent {
                    batch_id: batch_id.clone(),
                    current_file: index + 1,
                    total_files: total,
                    current_schedule: file.schedule_code.clone(),
                    schedule_name: self.canonicalizer.dictionary().schedule_name(&file.schedule_code),
                    percentage: done as f64 / total as f64 * 100.0,
                    message,
                    kind,
                };

                match self.process_file(
                    file,
                    institution_filter,
                    resume_mode,
                    progress,
                    &event,
                    &mut outcome,
                )? {
                    FileOutcome::Completed => outcome.completed += 1,
                    FileOutcome::Skipped => outcome.skipped += 1,
                    FileOutcome::Failed => {}
                }
            }

            let failed = outcome.failed_files.len();
            info!(
                completed = outcome.completed,
                failed,
                skipped = outcome.skipped,
                records = outcome.record_count(),
                "Batch finished in {:.1}s",
                started.elapsed().as_secs_f64()
            );
            for failure in &outcome.failed_files {
                warn!(
                    "  {} failed (attempt {}): {}",
                    failure.filename,
                    failure.retry_count,
                    redact_message(&failure.error, &failure.path)
                );
            }

            report_safely(
                progress,
                &ProgressEvent {
                    batch_id: batch_id.clone(),
                    current_file: total,
                    total_files: total,
                    current_schedule: String::new(),
                    schedule_name: String::new(),
                    percentage: 100.0,
                    message: format!(
                        "Batch complete: {} completed, {} failed, {} skipped",
                        outcome.completed, failed, outcome.skipped
                    ),
                    kind: ProgressKind::BatchComplete {
                        completed: outcome.completed,
                        failed,
                        skipped: outcome.skipped,
                    },
                },
            );

            run.finished_at = Some(Utc::now());
            run.completed_files = outcome.completed as u64;
            run.failed_files = failed as u64;
            run.skipped_files = outcome.skipped as u64;
            run.records_emitted = outcome.record_count() as u64;
            run.cancelled = outcome.cancelled;
            stats_repo::finish_batch_run(&self.db, &run)?;

            Ok(outcome)
        })
    }

    fn stop_reason(&self, started: Instant) -> Option<&'static str> {
        if self.stop.load(Ordering::Relaxed) {
            return Some("stop requested");
        }
        match self.time_budget {
            Some(budget) if started.elapsed() >= budget => Some("time budget exhausted"),
            _ => None,
        }
    }

    fn process_file(
        &self,
        file: &FileRecord,
        institution_filter: Option<&str>,
        resume_mode: bool,
        progress: &dyn ProgressReporter,
        event: &dyn Fn(ProgressKind, String, usize) -> ProgressEvent,
        outcome: &mut BatchOutcome,
    ) -> Result<FileOutcome, PipelineError> {
        let span = info_span!("file", file = %redact_path(&file.path), schedule = %file.schedule_code);
        let _enter = span.enter();
        let done_before = outcome.completed + outcome.skipped + outcome.failed_files.len();

        // The caller's record may be stale; the ledger decides.
        let Some(current) = file_repo::find_by_path(&self.db, &file.path)? else {
            warn!("Not in the ledger, skipping");
            report_safely(
                progress,
                &event(
                    ProgressKind::ScheduleSkipped,
                    format!("{} is not tracked", file.filename),
                    done_before + 1,
                ),
            );
            return Ok(FileOutcome::Skipped);
        };

        if current.status == FileStatus::Completed && !resume_mode {
            debug!("Already completed, skipping");
            report_safely(
                progress,
                &event(
                    ProgressKind::ScheduleSkipped,
                    format!("{} already processed", current.schedule_code),
                    done_before + 1,
                ),
            );
            return Ok(FileOutcome::Skipped);
        }

        if !file_repo::mark_processing(&self.db, &current.path)? {
            warn!("Could not claim file (status {}), skipping", current.status);
            report_safely(
                progress,
                &event(
                    ProgressKind::ScheduleSkipped,
                    format!("{} is {}", current.schedule_code, current.status),
                    done_before + 1,
                ),
            );
            return Ok(FileOutcome::Skipped);
        }

        report_safely(
            progress,
            &event(
                ProgressKind::Started,
                format!("Processing {}", current.schedule_code),
                done_before,
            ),
        );

        let converted = convert_isolated(|| {
            self.canonicalizer
                .convert_file(&current.path, &current.schedule_code, institution_filter)
        });

        match converted {
            Ok(conversion) => {
                let rows = conversion.records.len() as u64;
                if !file_repo::mark_completed(
                    &self.db,
                    &current.path,
                    rows,
                    conversion.institution_count,
                )? {
                    return Ok(self.lost_claim(&current, progress, event, done_before));
                }

                if conversion.filter_matched_nothing() {
                    outcome.filter_misses.push(current.schedule_code.clone());
                }

                if conversion.records.is_empty() {
                    info!("Completed with no records");
                    report_safely(
                        progress,
                        &event(
                            ProgressKind::ScheduleEmpty,
                            format!("{}: no records", current.schedule_code),
                            done_before + 1,
                        ),
                    );
                } else {
                    info!("Completed: {} records", rows);
                    let schedule_name = self
                        .canonicalizer
                        .dictionary()
                        .schedule_name(&current.schedule_code);
                    let entry = outcome
                        .records_by_schedule
                        .entry(current.schedule_code.clone())
                        .or_insert_with(|| ScheduleRecords {
                            schedule_code: current.schedule_code.clone(),
                            schedule_name,
                            source_file: current.filename.clone(),
                            records: Vec::new(),
                            stats: ConversionStats::default(),
                        });
                    entry.records.extend(conversion.records);
                    entry.stats = conversion.stats;
                    report_safely(
                        progress,
                        &event(
                            ProgressKind::ScheduleCompleted { rows },
                            format!("{}: {} records", current.schedule_code, rows),
                            done_before + 1,
                        ),
                    );
                }
                Ok(FileOutcome::Completed)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Failed: {}", redact_message(&message, &current.path));
                if !file_repo::mark_failed(&self.db, &current.path, &message)? {
                    return Ok(self.lost_claim(&current, progress, event, done_before));
                }
                let Some(stored) = file_repo::find_by_path(&self.db, &current.path)? else {
                    return Ok(self.lost_claim(&current, progress, event, done_before));
                };

                outcome.failed_files.push(FailedFile {
                    path: current.path.clone(),
                    schedule_code: current.schedule_code.clone(),
                    filename: current.filename.clone(),
                    error: message.clone(),
                    retry_count: stored.retry_count,
                });
                report_safely(
                    progress,
                    &event(
                        ProgressKind::ScheduleFailed { error: message },
                        format!("{} failed", current.schedule_code),
                        done_before + 1,
                    ),
                );
                Ok(FileOutcome::Failed)
            }
        }
    }

    /// The ledger row left `processing` while the file was converting, e.g.
    /// another run requeued it. Its result is dropped and the row is left
    /// as the other writer set it.
    fn lost_claim(
        &self,
        current: &FileRecord,
        progress: &dyn ProgressReporter,
        event: &dyn Fn(ProgressKind, String, usize) -> ProgressEvent,
        done_before: usize,
    ) -> FileOutcome {
        warn!("File is no longer claimed by this run, discarding its result");
        report_safely(
            progress,
            &event(
                ProgressKind::ScheduleSkipped,
                format!("{} was released during conversion", current.schedule_code),
                done_before + 1,
            ),
        );
        FileOutcome::Skipped
    }
}

enum FileOutcome {
    Completed,
    Skipped,
    Failed,
}

/// A panic inside conversion fails the file instead of the batch.
fn convert_isolated<F>(convert: F) -> Result<Conversion, ReadError>
where
    F: FnOnce() -> Result<Conversion, ReadError>,
{
    catch_unwind(AssertUnwindSafe(convert)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ReadError::Worker(format!("panicked: {}", reason)))
    })
}

/// Reporter failures never reach the batch.
fn report_safely(progress: &dyn ProgressReporter, event: &ProgressEvent) {
    if catch_unwind(AssertUnwindSafe(|| progress.report(event))).is_err() {
        warn!("Progress reporter panicked on {:?} event, ignoring", event.kind);
    }
}
