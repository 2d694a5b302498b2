use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{InvalidQuarter, QuarterKey};

#[derive(Error, Debug)]
pub enum FireBulkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("Organizer error: {0}")]
    Organizer(#[from] OrganizerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    InvalidQuarter(#[from] InvalidQuarter),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// A candidate file that could not be classified. Logged and skipped.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No schedule pattern matches '{filename}'")]
    UnknownSchedule { filename: String },

    #[error("Invalid report date '{raw}' in '{filename}'")]
    InvalidReportDate { filename: String, raw: String },

    #[error("Failed to stat '{path}': {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fingerprint '{path}': {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file that could not be read or parsed at processing time. Recorded as
/// the file's failure message.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed data in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{path}' has no '{column}' column")]
    MissingInstitutionColumn { path: PathBuf, column: String },

    #[error("'{path}' has an empty header row")]
    EmptyHeader { path: PathBuf },

    #[error("Conversion worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("Failed to read dictionary file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {table} table: {source}")]
    Parse {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum OrganizerError {
    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("Scan failed: {0}")]
    Scan(#[from] WorkerError),

    #[error("Quarter {quarter} not found (available: {})", format_quarters(.available))]
    QuarterNotFound {
        quarter: QuarterKey,
        available: Vec<QuarterKey>,
    },

    #[error("Failed to resolve directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_quarters(quarters: &[QuarterKey]) -> String {
    if quarters.is_empty() {
        return "none".to_string();
    }
    quarters
        .iter()
        .map(|q| q.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Errors that abort a whole batch. Per-file failures never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("Failed to build conversion thread pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, FireBulkError>;
