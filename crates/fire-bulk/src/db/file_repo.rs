//! File repository: the processing ledger over the `file_records` table.
//!
//! Every status mutation is a single `UPDATE` guarded by the set of states
//! the target state may be entered from, so a stale caller can never push a
//! record through an illegal transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::{FileRecord, FileStatus, QuarterKey};

/// What an [`upsert`] did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Path was not tracked yet.
    Inserted,
    /// Fingerprint differed; the record was reset to `pending`.
    Changed,
    /// Fingerprint matched; the stored record was left as is.
    Unchanged,
}

/// Query filter for ledger reads and bulk updates.
#[derive(Debug, Default, Clone)]
pub struct FileFilter {
    pub quarter: Option<QuarterKey>,
    /// Only records whose path lies directly or transitively under this directory.
    pub directory: Option<PathBuf>,
    /// Empty means any status.
    pub statuses: Vec<FileStatus>,
    pub schedule_code: Option<String>,
}

impl FileFilter {
    pub fn quarter(quarter: QuarterKey) -> Self {
        Self {
            quarter: Some(quarter),
            ..Default::default()
        }
    }

    pub fn in_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_statuses(mut self, statuses: &[FileStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Renders the filter as SQL conditions plus their bound values.
    /// Placeholders are numbered from `?1`.
    fn conditions(&self) -> (Vec<String>, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(quarter) = self.quarter {
            values.push(Box::new(quarter.year));
            values.push(Box::new(quarter.quarter));
            conditions.push(format!(
                "year = ?{} AND quarter = ?{}",
                values.len() - 1,
                values.len()
            ));
        }
        if let Some(ref directory) = self.directory {
            values.push(Box::new(directory_prefix(directory)));
            let idx = values.len();
            conditions.push(format!("substr(path, 1, length(?{idx})) = ?{idx}"));
        }
        if !self.statuses.is_empty() {
            let mut placeholders = Vec::with_capacity(self.statuses.len());
            for status in &self.statuses {
                values.push(Box::new(*status));
                placeholders.push(format!("?{}", values.len()));
            }
            conditions.push(format!("status IN ({})", placeholders.join(", ")));
        }
        if let Some(ref code) = self.schedule_code {
            values.push(Box::new(code.clone()));
            conditions.push(format!("schedule_code = ?{}", values.len()));
        }

        (conditions, values)
    }
}

fn directory_prefix(directory: &Path) -> String {
    let dir = directory.to_string_lossy();
    format!("{}{}", dir.trim_end_matches(MAIN_SEPARATOR), MAIN_SEPARATOR)
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

/// SQL list of the statuses `next` may be entered from.
fn predecessor_list(next: FileStatus) -> String {
    FileStatus::predecessors(next)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn record_from_row(row: &Row<'_>) -> Result<FileRecord, rusqlite::Error> {
    let path: String = row.get("path")?;
    let year: i32 = row.get("year")?;
    let quarter: u8 = row.get("quarter")?;
    let quarter = QuarterKey::new(year, quarter).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })?;
    let report_date: NaiveDate = row.get("report_date")?;

    Ok(FileRecord {
        path: PathBuf::from(path),
        filename: row.get("filename")?,
        schedule_code: row.get("schedule_code")?,
        report_date,
        quarter,
        file_size: row.get("file_size")?,
        fingerprint: row.get("fingerprint")?,
        last_modified: row.get("last_modified")?,
        status: row.get("status")?,
        row_count: row.get("row_count")?,
        institution_count: row.get("institution_count")?,
        error_message: row.get("error_message")?,
        retry_count: row.get("retry_count")?,
        last_retry_at: row.get("last_retry_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Inserts a newly discovered file, or refreshes a known one whose content
/// fingerprint changed. A known file with an unchanged fingerprint keeps its
/// processing state untouched.
pub fn upsert(db: &Database, record: &FileRecord) -> Result<UpsertOutcome, DatabaseError> {
    let path = record.path_str();
    let now = Utc::now();

    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT fingerprint FROM file_records WHERE path = ?1",
                params![path],
                |r| r.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO file_records (path, filename, schedule_code, report_date, year,
                     quarter, file_size, fingerprint, last_modified, status, retry_count,
                     created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
                    params![
                        path,
                        record.filename,
                        record.schedule_code,
                        record.report_date,
                        record.quarter.year,
                        record.quarter.quarter,
                        record.file_size,
                        record.fingerprint,
                        record.last_modified,
                        FileStatus::Pending,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some(fingerprint) if fingerprint == record.fingerprint => UpsertOutcome::Unchanged,
            Some(_) => {
                tx.execute(
                    "UPDATE file_records SET filename = ?2, schedule_code = ?3, report_date = ?4,
                     year = ?5, quarter = ?6, file_size = ?7, fingerprint = ?8,
                     last_modified = ?9, status = ?10, row_count = NULL,
                     institution_count = NULL, error_message = NULL, completed_at = NULL,
                     updated_at = ?11
                     WHERE path = ?1",
                    params![
                        path,
                        record.filename,
                        record.schedule_code,
                        record.report_date,
                        record.quarter.year,
                        record.quarter.quarter,
                        record.file_size,
                        record.fingerprint,
                        record.last_modified,
                        FileStatus::Pending,
                        now,
                    ],
                )?;
                UpsertOutcome::Changed
            }
        };

        tx.commit()?;
        Ok(outcome)
    })
}

/// Finds a record by its absolute path.
pub fn find_by_path(db: &Database, path: &Path) -> Result<Option<FileRecord>, DatabaseError> {
    let path = path.to_string_lossy().to_string();
    db.with_conn(|conn| {
        let record = conn
            .query_row(
                "SELECT * FROM file_records WHERE path = ?1",
                params![path],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    })
}

/// Lists records matching the filter, ordered by quarter, schedule code, then path.
pub fn query(db: &Database, filter: &FileFilter) -> Result<Vec<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let (conditions, values) = filter.conditions();
        let sql = format!(
            "SELECT * FROM file_records {} ORDER BY year, quarter, schedule_code, path",
            where_clause(&conditions)
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts records matching the filter.
pub fn count(db: &Database, filter: &FileFilter) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let (conditions, values) = filter.conditions();
        let sql = format!(
            "SELECT COUNT(*) FROM file_records {}",
            where_clause(&conditions)
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&sql, params_ref.as_slice(), |r| r.get(0))?;
        Ok(total)
    })
}

/// All records for a quarter, sorted by schedule code.
pub fn get_by_quarter(db: &Database, quarter: QuarterKey) -> Result<Vec<FileRecord>, DatabaseError> {
    query(db, &FileFilter::quarter(quarter))
}

/// Records a resuming batch should pick up (`pending` or `failed`).
pub fn get_pending(
    db: &Database,
    quarter: Option<QuarterKey>,
) -> Result<Vec<FileRecord>, DatabaseError> {
    let filter = FileFilter {
        quarter,
        statuses: vec![FileStatus::Pending, FileStatus::Failed],
        ..Default::default()
    };
    query(db, &filter)
}

/// Failed records paired with their last error message.
pub fn get_failed(
    db: &Database,
    quarter: Option<QuarterKey>,
) -> Result<Vec<(FileRecord, String)>, DatabaseError> {
    let filter = FileFilter {
        quarter,
        statuses: vec![FileStatus::Failed],
        ..Default::default()
    };
    Ok(query(db, &filter)?
        .into_iter()
        .map(|record| {
            let error = record.error_message.clone().unwrap_or_default();
            (record, error)
        })
        .collect())
}

/// Claims a record for processing. Returns `false` if the record is missing
/// or already `processing`.
pub fn mark_processing(db: &Database, path: &Path) -> Result<bool, DatabaseError> {
    let path = path.to_string_lossy().to_string();
    let sql = format!(
        "UPDATE file_records SET status = ?2, updated_at = ?3
         WHERE path = ?1 AND status IN ({})",
        predecessor_list(FileStatus::Processing)
    );
    db.with_conn(|conn| {
        let changed = conn.execute(&sql, params![path, FileStatus::Processing, Utc::now()])?;
        Ok(changed == 1)
    })
}

/// Finalizes a successful run. Only a `processing` record can complete.
pub fn mark_completed(
    db: &Database,
    path: &Path,
    row_count: u64,
    institution_count: u64,
) -> Result<bool, DatabaseError> {
    let path = path.to_string_lossy().to_string();
    let now = Utc::now();
    let sql = format!(
        "UPDATE file_records SET status = ?2, row_count = ?3, institution_count = ?4,
         error_message = NULL, completed_at = ?5, updated_at = ?5
         WHERE path = ?1 AND status IN ({})",
        predecessor_list(FileStatus::Completed)
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![path, FileStatus::Completed, row_count, institution_count, now],
        )?;
        Ok(changed == 1)
    })
}

/// Records a failed attempt: stores the message, bumps `retry_count` and
/// stamps `last_retry_at`.
pub fn mark_failed(db: &Database, path: &Path, error: &str) -> Result<bool, DatabaseError> {
    let path = path.to_string_lossy().to_string();
    let now = Utc::now();
    let sql = format!(
        "UPDATE file_records SET status = ?2, error_message = ?3,
         retry_count = retry_count + 1, last_retry_at = ?4, updated_at = ?4
         WHERE path = ?1 AND status IN ({})",
        predecessor_list(FileStatus::Failed)
    );
    db.with_conn(|conn| {
        let changed = conn.execute(&sql, params![path, FileStatus::Failed, error, now])?;
        Ok(changed == 1)
    })
}

/// Moves records in `from` back to `pending`, restricted by `filter`.
fn requeue(
    db: &Database,
    filter: &FileFilter,
    from: FileStatus,
    clear_error: bool,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let (mut conditions, mut values) = filter.conditions();
        values.push(Box::new(from));
        conditions.push(format!("status = ?{}", values.len()));
        values.push(Box::new(FileStatus::Pending));
        let status_idx = values.len();
        values.push(Box::new(Utc::now()));
        let now_idx = values.len();

        let sql = format!(
            "UPDATE file_records SET status = ?{status_idx}, updated_at = ?{now_idx}{} {}",
            if clear_error { ", error_message = NULL" } else { "" },
            where_clause(&conditions)
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        Ok(conn.execute(&sql, params_ref.as_slice())?)
    })
}

/// Resets `failed` records to `pending` and clears their error message.
/// `retry_count` is preserved. Returns the number of records reset.
pub fn reset_failed(db: &Database, filter: &FileFilter) -> Result<usize, DatabaseError> {
    requeue(db, filter, FileStatus::Failed, true)
}

/// Returns records left in `processing` by an interrupted run to `pending`.
pub fn requeue_interrupted(db: &Database, filter: &FileFilter) -> Result<usize, DatabaseError> {
    requeue(db, filter, FileStatus::Processing, false)
}

/// Distinct quarters present in the ledger, newest first.
pub fn available_quarters(db: &Database) -> Result<Vec<QuarterKey>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT year, quarter FROM file_records ORDER BY year DESC, quarter DESC",
        )?;
        let pairs = stmt
            .query_map([], |r| Ok((r.get::<_, i32>(0)?, r.get::<_, u8>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        pairs
            .into_iter()
            .map(|(year, quarter)| {
                QuarterKey::new(year, quarter).map_err(|e| DatabaseError::InvalidColumn {
                    column: "quarter".to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    })
}

/// Record counts per status for records matching the filter.
pub fn count_by_status(
    db: &Database,
    filter: &FileFilter,
) -> Result<HashMap<FileStatus, u64>, DatabaseError> {
    db.with_conn(|conn| {
        let (conditions, values) = filter.conditions();
        let sql = format!(
            "SELECT status, COUNT(*) FROM file_records {} GROUP BY status",
            where_clause(&conditions)
        );
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params_ref.as_slice(), |r| {
                Ok((r.get::<_, FileStatus>(0)?, r.get::<_, u64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    })
}

/// Deletes `completed` records whose completion is older than `older_than_days`.
pub fn cleanup_completed(db: &Database, older_than_days: u32) -> Result<usize, DatabaseError> {
    let cutoff: DateTime<Utc> = Utc::now() - Duration::days(i64::from(older_than_days));
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM file_records WHERE status = ?1 AND completed_at < ?2",
            params![FileStatus::Completed, cutoff],
        )?;
        if removed > 0 {
            log::info!(
                "Removed {} completed file records older than {} days",
                removed,
                older_than_days
            );
        }
        Ok(removed)
    })
}
