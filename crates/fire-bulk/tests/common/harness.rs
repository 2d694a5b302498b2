//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct provides:
//! - A temporary bulk directory for FFIEC-named schedule files
//! - A file-backed ledger in the same temp directory
//! - The built-in Code Dictionary and a test-sized pipeline configuration

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use fire_bulk::db::file_repo;
use fire_bulk::pipeline::NoopProgress;
use fire_bulk::{
    BatchOutcome, BatchProcessor, CodeDictionary, Database, DirectoryScanner, FileRecord,
    FileStatus, PipelineConfig, PreparedBatch, QuarterKey, QuarterOrganizer, ScanReport,
    Telemetry,
};

use super::builders::PipelineConfigBuilder;

/// Report date used by `write_schedule` unless a test picks another.
pub const Q4_2023_DATE: &str = "12312023";

pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory holding the bulk files (canonical path).
    pub bulk_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
    pub dictionary: Arc<CodeDictionary>,
    pub config: PipelineConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfigBuilder::new().build())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let bulk_dir = temp_dir.path().join("bulk");
        std::fs::create_dir_all(&bulk_dir).expect("Failed to create bulk dir");
        let bulk_dir = bulk_dir
            .canonicalize()
            .expect("Failed to canonicalize bulk dir");

        let db_path = temp_dir.path().join("ledger").join("bulk_files.db");
        let db = Database::open(&db_path).expect("Failed to open ledger");
        let dictionary = Arc::new(CodeDictionary::builtin().expect("Built-in dictionary"));

        Self {
            temp_dir,
            bulk_dir,
            db_path,
            db,
            dictionary,
            config,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn q4_2023() -> QuarterKey {
        "2023-Q4".parse().expect("valid quarter")
    }

    /// Filename the FFIEC download uses for a schedule.
    pub fn schedule_filename(code: &str, date: &str) -> String {
        format!("FFIEC CDR Call Schedule {} {}.txt", code, date)
    }

    /// Write a schedule file dated 2023-12-31.
    pub fn write_schedule(&self, code: &str, content: &str) -> PathBuf {
        self.write_schedule_dated(code, Q4_2023_DATE, content)
    }

    pub fn write_schedule_dated(&self, code: &str, date: &str, content: &str) -> PathBuf {
        self.write_file(&Self::schedule_filename(code, date), content.as_bytes())
    }

    pub fn write_file(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.bulk_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write bulk file");
        path
    }

    pub fn scanner(&self) -> DirectoryScanner {
        DirectoryScanner::new(self.db.clone(), self.config.scan_workers, Telemetry::disabled())
            .with_expected_schedules(self.config.expected_schedules.clone())
    }

    pub fn organizer(&self) -> QuarterOrganizer {
        QuarterOrganizer::new(self.db.clone(), &self.config, Telemetry::disabled())
    }

    pub fn processor(&self) -> BatchProcessor {
        BatchProcessor::new(
            self.db.clone(),
            Arc::clone(&self.dictionary),
            &self.config,
            Telemetry::disabled(),
        )
        .expect("Failed to build batch processor")
    }

    pub fn scan(&self) -> ScanReport {
        self.scanner().scan(&self.bulk_dir).expect("Scan failed")
    }

    pub fn prepare(&self, resume: bool, retry_failed: bool) -> PreparedBatch {
        self.organizer()
            .prepare_batch(Self::q4_2023(), &self.bulk_dir, resume, retry_failed)
            .expect("prepare_batch failed")
    }

    /// Prepare the quarter and run it through a fresh processor.
    pub fn run(&self, resume: bool, retry_failed: bool, rssd: Option<&str>) -> BatchOutcome {
        let batch = self.prepare(resume, retry_failed);
        self.processor()
            .process_prepared(&batch, rssd, &NoopProgress)
            .expect("Batch aborted")
    }

    pub fn record(&self, path: &Path) -> FileRecord {
        file_repo::find_by_path(&self.db, path)
            .expect("ledger read failed")
            .expect("no ledger entry for path")
    }

    /// Status of every ledger entry keyed by schedule code.
    pub fn statuses(&self) -> BTreeMap<String, FileStatus> {
        file_repo::get_by_quarter(&self.db, Self::q4_2023())
            .expect("ledger read failed")
            .into_iter()
            .map(|r| (r.schedule_code, r.status))
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
