//! Ledger entry for one discovered bulk file and its processing state machine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use super::quarter::QuarterKey;

/// Lifecycle status of a [`FileRecord`].
///
/// ```text
/// pending ──> processing ──> completed
///    │            │              │
///    └──────> failed <───────────┘ (via processing)
/// ```
///
/// `failed -> pending` happens only through an explicit reset, and a changed
/// fingerprint sends any status back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Pending,
        FileStatus::Processing,
        FileStatus::Completed,
        FileStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    /// Whether the ledger may move a record from `self` to `next`.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        match (self, next) {
            (Pending, Processing) | (Failed, Processing) | (Completed, Processing) => true,
            (Processing, Completed) => true,
            (Pending, Failed) | (Processing, Failed) => true,
            // Explicit retry, interrupted-run recovery, fingerprint change.
            (Failed, Pending) | (Processing, Pending) | (Completed, Pending) => true,
            (Pending, Completed) | (Failed, Completed) | (Completed, Failed) => false,
            (Pending, Pending)
            | (Processing, Processing)
            | (Completed, Completed)
            | (Failed, Failed) => false,
        }
    }

    /// Statuses from which `next` is reachable in one step.
    pub fn predecessors(next: FileStatus) -> Vec<FileStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }

    /// Whether a batch in resume mode should pick this record up.
    pub fn is_resumable(self) -> bool {
        matches!(self, FileStatus::Pending | FileStatus::Failed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

impl ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FileStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// One discovered input file, keyed by absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub filename: String,
    /// Schedule code, with the part number appended for multi-part files (`RCC1`).
    pub schedule_code: String,
    pub report_date: NaiveDate,
    pub quarter: QuarterKey,
    pub file_size: u64,
    /// Hex SHA-256 over the first [`crate::scanner::FINGERPRINT_PREFIX_BYTES`] bytes.
    pub fingerprint: String,
    pub last_modified: DateTime<Utc>,
    pub status: FileStatus,
    pub row_count: Option<u64>,
    pub institution_count: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// A freshly discovered file, not yet processed.
    pub fn discovered(
        path: PathBuf,
        filename: String,
        schedule_code: String,
        report_date: NaiveDate,
        file_size: u64,
        fingerprint: String,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            filename,
            schedule_code,
            quarter: QuarterKey::from_date(report_date),
            report_date,
            file_size,
            fingerprint,
            last_modified,
            status: FileStatus::Pending,
            row_count: None,
            institution_count: None,
            error_message: None,
            retry_count: 0,
            last_retry_at: None,
            completed_at: None,
        }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}
