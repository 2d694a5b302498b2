//! Processing statistics and batch-run ledger.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::QuarterKey;

/// Per-quarter file counts.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuarterStats {
    pub quarter: QuarterKey,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
}

/// Ledger-wide totals plus a per-quarter breakdown (newest quarter first).
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_files: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub processing: u64,
    pub total_rows: u64,
    pub quarters: Vec<QuarterStats>,
}

/// Aggregates the whole ledger.
pub fn processing_stats(db: &Database) -> Result<ProcessingStats, DatabaseError> {
    db.with_conn(|conn| {
        let mut stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'processing'), 0),
                    COALESCE(SUM(row_count), 0)
             FROM file_records",
            [],
            |r| {
                Ok(ProcessingStats {
                    total_files: r.get(0)?,
                    completed: r.get(1)?,
                    failed: r.get(2)?,
                    pending: r.get(3)?,
                    processing: r.get(4)?,
                    total_rows: r.get(5)?,
                    quarters: Vec::new(),
                })
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT year, quarter, COUNT(*),
                    SUM(status = 'completed'),
                    SUM(status = 'failed'),
                    SUM(status = 'pending')
             FROM file_records
             GROUP BY year, quarter
             ORDER BY year DESC, quarter DESC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i32>(0)?,
                    r.get::<_, u8>(1)?,
                    r.get::<_, u64>(2)?,
                    r.get::<_, u64>(3)?,
                    r.get::<_, u64>(4)?,
                    r.get::<_, u64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (year, quarter, total, completed, failed, pending) in rows {
            let quarter =
                QuarterKey::new(year, quarter).map_err(|e| DatabaseError::InvalidColumn {
                    column: "quarter".to_string(),
                    reason: e.to_string(),
                })?;
            stats.quarters.push(QuarterStats {
                quarter,
                total,
                completed,
                failed,
                pending,
            });
        }

        Ok(stats)
    })
}

/// One batch run as stored in `batch_runs`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunRow {
    pub id: String,
    pub quarter: String,
    pub directory: String,
    /// `full`, `resume` or `retry`.
    pub mode: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub records_emitted: u64,
    pub cancelled: bool,
}

impl BatchRunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            quarter: row.get("quarter")?,
            directory: row.get("directory")?,
            mode: row.get("mode")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            total_files: row.get("total_files")?,
            completed_files: row.get("completed_files")?,
            failed_files: row.get("failed_files")?,
            skipped_files: row.get("skipped_files")?,
            records_emitted: row.get("records_emitted")?,
            cancelled: row.get("cancelled")?,
        })
    }
}

/// Inserts a run row when a batch starts.
pub fn record_batch_run(db: &Database, run: &BatchRunRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batch_runs (id, quarter, directory, mode, started_at, finished_at,
             total_files, completed_files, failed_files, skipped_files, records_emitted, cancelled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.id,
                run.quarter,
                run.directory,
                run.mode,
                run.started_at,
                run.finished_at,
                run.total_files,
                run.completed_files,
                run.failed_files,
                run.skipped_files,
                run.records_emitted,
                run.cancelled,
            ],
        )?;
        Ok(())
    })
}

/// Writes the final counters of a run. A run without `finished_at` was interrupted.
pub fn finish_batch_run(db: &Database, run: &BatchRunRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batch_runs SET finished_at = ?2, total_files = ?3, completed_files = ?4,
             failed_files = ?5, skipped_files = ?6, records_emitted = ?7, cancelled = ?8
             WHERE id = ?1",
            params![
                run.id,
                run.finished_at,
                run.total_files,
                run.completed_files,
                run.failed_files,
                run.skipped_files,
                run.records_emitted,
                run.cancelled,
            ],
        )?;
        Ok(())
    })
}

/// Most recent runs first.
pub fn recent_runs(db: &Database, limit: u32) -> Result<Vec<BatchRunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM batch_runs ORDER BY started_at DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit], BatchRunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
