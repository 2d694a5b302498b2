//! Fingerprint Scanner: discovers bulk files in a directory, classifies and
//! fingerprints them on a worker pool, and upserts them into the ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

use crate::db::{file_repo, Database, UpsertOutcome};
use crate::error::{DiscoveryError, WorkerError};
use crate::model::{Completeness, FileRecord, QuarterKey};
use crate::sanitize::redact_path;
use crate::telemetry::Telemetry;
use crate::worker::{ScanJob, WorkerPool};

pub mod fingerprint;
pub mod patterns;

pub use fingerprint::{fingerprint, FINGERPRINT_PREFIX_BYTES};
pub use patterns::{ScheduleMatch, ScheduleRegistry, EXPECTED_SCHEDULES};

/// A candidate file the scanner could not use.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one directory scan.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub directory: PathBuf,
    /// Ledger records for every recognised file, grouped by quarter and
    /// sorted by schedule code.
    pub quarters: BTreeMap<QuarterKey, Vec<FileRecord>>,
    pub inserted: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedFile>,
}

impl ScanReport {
    pub fn file_count(&self) -> usize {
        self.quarters.values().map(Vec::len).sum()
    }
}

/// Classifies and fingerprints one file. Runs on scan workers.
pub fn analyze_file(registry: &ScheduleRegistry, path: &Path) -> Result<FileRecord, DiscoveryError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let matched = registry.classify(&filename)?;

    let metadata = std::fs::metadata(path).map_err(|e| DiscoveryError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })?;
    let last_modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|e| DiscoveryError::Metadata {
            path: path.to_path_buf(),
            source: e,
        })?;

    let fingerprint = fingerprint(path).map_err(|e| DiscoveryError::Fingerprint {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!(
        file = %redact_path(path),
        schedule = %matched.schedule_code,
        "Classified bulk file"
    );

    Ok(FileRecord::discovered(
        path.to_path_buf(),
        filename,
        matched.schedule_code,
        matched.report_date,
        metadata.len(),
        fingerprint,
        last_modified,
    ))
}

pub struct DirectoryScanner {
    registry: Arc<ScheduleRegistry>,
    db: Database,
    workers: usize,
    expected_schedules: Vec<String>,
    telemetry: Telemetry,
}

impl DirectoryScanner {
    pub fn new(db: Database, workers: usize, telemetry: Telemetry) -> Self {
        Self {
            registry: Arc::new(ScheduleRegistry::ffiec()),
            db,
            workers,
            expected_schedules: EXPECTED_SCHEDULES.iter().map(|s| s.to_string()).collect(),
            telemetry: telemetry.for_component("scanner"),
        }
    }

    pub fn with_registry(mut self, registry: ScheduleRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_expected_schedules(mut self, expected: Vec<String>) -> Self {
        self.expected_schedules = expected;
        self
    }

    /// Scans the top level of `directory` for `*.txt` bulk files and upserts
    /// every recognised file. Files that cannot be classified are skipped.
    pub fn scan(&self, directory: &Path) -> Result<ScanReport, WorkerError> {
        self.telemetry.in_scope(|| -> Result<ScanReport, WorkerError> {
            let root = directory
                .canonicalize()
                .unwrap_or_else(|_| directory.to_path_buf());
            let span = info_span!("scan", directory = %redact_path(&root));
            let _enter = span.enter();

            let candidates = candidate_files(&root)?;
            info!("Found {} candidate files", candidates.len());

            let pool = WorkerPool::new(
                Arc::clone(&self.registry),
                self.workers,
                self.telemetry.clone(),
            )?;
            for path in candidates {
                pool.submit(ScanJob::new(path))?;
            }
            let results = pool.finish();

            let mut report = ScanReport {
                directory: root.clone(),
                ..Default::default()
            };

            for result in results {
                let record = match result.outcome {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(file = %redact_path(&result.path), "Skipping file: {}", e);
                        report.skipped.push(SkippedFile {
                            path: result.path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                match file_repo::upsert(&self.db, &record)? {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Changed => {
                        info!(file = %redact_path(&record.path), "Content changed, reset to pending");
                        report.changed += 1;
                    }
                    UpsertOutcome::Unchanged => report.unchanged += 1,
                }

                let stored = file_repo::find_by_path(&self.db, &record.path)?.unwrap_or(record);
                report
                    .quarters
                    .entry(stored.quarter)
                    .or_default()
                    .push(stored);
            }

            for files in report.quarters.values_mut() {
                files.sort_by(|a, b| {
                    a.schedule_code
                        .cmp(&b.schedule_code)
                        .then_with(|| a.path.cmp(&b.path))
                });
            }

            self.log_summary(&report);
            Ok(report)
        })
    }

    fn log_summary(&self, report: &ScanReport) {
        info!(
            files = report.file_count(),
            inserted = report.inserted,
            changed = report.changed,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "Scan complete: {} quarters",
            report.quarters.len()
        );
        for (quarter, files) in report.quarters.iter().rev() {
            info!("  {}: {} files", quarter, files.len());
            let codes: Vec<&str> = files.iter().map(|f| f.schedule_code.as_str()).collect();
            let completeness = Completeness::evaluate(&self.expected_schedules, &codes);
            if !completeness.is_complete() {
                warn!(
                    "    Missing schedules: {}",
                    completeness.missing_schedules.join(", ")
                );
            }
        }
    }
}

/// Top-level `*.txt` files only.
fn candidate_files(root: &Path) -> Result<Vec<PathBuf>, WorkerError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| WorkerError::ScanFailed {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_txt = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if is_txt {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
