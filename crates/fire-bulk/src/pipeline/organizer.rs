//! Quarter Organizer: picks the files one batch should process and checks
//! the quarter against the expected schedule set.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::db::{file_repo, Database, FileFilter};
use crate::error::OrganizerError;
use crate::model::{Completeness, FileRecord, FileStatus, QuarterKey};
use crate::scanner::DirectoryScanner;
use crate::telemetry::Telemetry;

use super::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    Full,
    Resume,
    Retry,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::Full => "full",
            BatchMode::Resume => "resume",
            BatchMode::Retry => "retry",
        }
    }

    pub fn is_resume(&self) -> bool {
        matches!(self, BatchMode::Resume)
    }
}

/// Files selected for one batch, plus the quarter's completeness.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedBatch {
    pub quarter: QuarterKey,
    pub directory: PathBuf,
    pub mode: BatchMode,
    pub files: Vec<FileRecord>,
    pub completeness: Completeness,
    /// Failed records reset to pending before selection.
    pub reset_failed: usize,
    /// Records left in `processing` by an interrupted run, re-queued.
    pub requeued: usize,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct QuarterOrganizer {
    db: Database,
    scanner: DirectoryScanner,
    expected_schedules: Vec<String>,
    telemetry: Telemetry,
}

impl QuarterOrganizer {
    pub fn new(db: Database, config: &PipelineConfig, telemetry: Telemetry) -> Self {
        let scanner = DirectoryScanner::new(db.clone(), config.scan_workers, telemetry.clone())
            .with_expected_schedules(config.expected_schedules.clone());
        Self {
            db,
            scanner,
            expected_schedules: config.expected_schedules.clone(),
            telemetry: telemetry.for_component("organizer"),
        }
    }

    pub fn scanner(&self) -> &DirectoryScanner {
        &self.scanner
    }

    /// Selects the batch for `quarter` in `directory`.
    ///
    /// The directory is scanned first if the ledger holds nothing under it.
    /// In resume mode only `pending` and `failed` files are returned; with
    /// `retry_failed` failed files are reset to `pending` first. An empty
    /// selection is a valid result.
    pub fn prepare_batch(
        &self,
        quarter: QuarterKey,
        directory: &Path,
        resume: bool,
        retry_failed: bool,
    ) -> Result<PreparedBatch, OrganizerError> {
        self.telemetry.in_scope(|| -> Result<PreparedBatch, OrganizerError> {
            let directory = directory
                .canonicalize()
                .map_err(|e| OrganizerError::Directory {
                    path: directory.to_path_buf(),
                    source: e,
                })?;

            let in_directory = FileFilter::default().in_directory(&directory);
            if file_repo::count(&self.db, &in_directory)? == 0 {
                info!("No ledger entries for this directory yet, scanning first");
                self.scanner.scan(&directory)?;
            }

            let quarter_filter = FileFilter::quarter(quarter).in_directory(&directory);
            let all_files = file_repo::query(&self.db, &quarter_filter)?;
            if all_files.is_empty() {
                return Err(OrganizerError::QuarterNotFound {
                    quarter,
                    available: file_repo::available_quarters(&self.db)?,
                });
            }

            let present: Vec<&str> = all_files.iter().map(|f| f.schedule_code.as_str()).collect();
            let completeness = Completeness::evaluate(&self.expected_schedules, &present);
            if completeness.is_complete() {
                info!("Quarter {} is complete ({} files)", quarter, all_files.len());
            } else {
                warn!(
                    "Quarter {} is {:.1}% complete, missing: {}",
                    quarter,
                    completeness.percentage,
                    completeness.missing_schedules.join(", ")
                );
            }

            let reset_failed = if retry_failed {
                let n = file_repo::reset_failed(&self.db, &quarter_filter)?;
                info!("Reset {} failed files to pending", n);
                n
            } else {
                0
            };

            let (mode, files, requeued) = if resume {
                let requeued = file_repo::requeue_interrupted(&self.db, &quarter_filter)?;
                if requeued > 0 {
                    warn!("Re-queued {} files left in processing by an interrupted run", requeued);
                }
                let pending = quarter_filter
                    .clone()
                    .with_statuses(&[FileStatus::Pending, FileStatus::Failed]);
                (BatchMode::Resume, file_repo::query(&self.db, &pending)?, requeued)
            } else if retry_failed {
                (BatchMode::Retry, file_repo::query(&self.db, &quarter_filter)?, 0)
            } else if reset_failed == 0 {
                (BatchMode::Full, all_files, 0)
            } else {
                (BatchMode::Full, file_repo::query(&self.db, &quarter_filter)?, 0)
            };

            let mut files = files;
            files.sort_by(|a, b| {
                a.schedule_code
                    .cmp(&b.schedule_code)
                    .then_with(|| a.path.cmp(&b.path))
            });

            if files.is_empty() {
                info!("Nothing to process for {}", quarter);
            } else {
                info!("Selected {} files for {} ({})", files.len(), quarter, mode.as_str());
            }

            Ok(PreparedBatch {
                quarter,
                directory,
                mode,
                files,
                completeness,
                reset_failed,
                requeued,
            })
        })
    }
}
