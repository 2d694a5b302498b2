//! Tab-delimited bulk file reader.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};

use crate::dictionary::is_metric_column;
use crate::error::ReadError;

/// Header of the institution identifier column.
pub const INSTITUTION_COLUMN: &str = "IDRSSD";

/// Which columns of a bulk file carry what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    headers: Vec<String>,
    id_column: usize,
    metric_columns: Vec<usize>,
}

impl ColumnLayout {
    /// Headers are compared after trimming whitespace, quotes and a UTF-8 BOM.
    pub fn from_headers(path: &Path, headers: &StringRecord) -> Result<Self, ReadError> {
        let headers: Vec<String> = headers
            .iter()
            .map(|h| {
                h.trim_start_matches('\u{feff}')
                    .trim()
                    .trim_matches('"')
                    .to_string()
            })
            .collect();

        if headers.iter().all(String::is_empty) {
            return Err(ReadError::EmptyHeader {
                path: path.to_path_buf(),
            });
        }

        let id_column = headers
            .iter()
            .position(|h| h == INSTITUTION_COLUMN)
            .ok_or_else(|| ReadError::MissingInstitutionColumn {
                path: path.to_path_buf(),
                column: INSTITUTION_COLUMN.to_string(),
            })?;

        let metric_columns = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != id_column && is_metric_column(h))
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            headers,
            id_column,
            metric_columns,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn id_column(&self) -> usize {
        self.id_column
    }

    pub fn metric_columns(&self) -> &[usize] {
        &self.metric_columns
    }

    pub fn header(&self, index: usize) -> &str {
        self.headers.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Streams rows from one bulk file.
pub struct BulkReader<R> {
    path: PathBuf,
    layout: ColumnLayout,
    records: csv::Reader<R>,
}

impl BulkReader<File> {
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|e| ReadError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_reader(path, file)
    }
}

impl<R: Read> BulkReader<R> {
    pub fn from_reader(path: &Path, reader: R) -> Result<Self, ReadError> {
        let mut records = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = records.headers().map_err(|e| csv_error(path, e))?.clone();
        let layout = ColumnLayout::from_headers(path, &headers)?;

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            records,
        })
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Up to `max_rows` further rows; empty once the file is exhausted.
    pub fn read_chunk(&mut self, max_rows: usize) -> Result<Vec<StringRecord>, ReadError> {
        let mut rows = Vec::with_capacity(max_rows.min(1024));
        let mut record = StringRecord::new();
        while rows.len() < max_rows {
            let more = self
                .records
                .read_record(&mut record)
                .map_err(|e| csv_error(&self.path, e))?;
            if !more {
                break;
            }
            rows.push(record.clone());
        }
        Ok(rows)
    }

    pub fn read_all(&mut self) -> Result<Vec<StringRecord>, ReadError> {
        self.read_chunk(usize::MAX)
    }
}

fn csv_error(path: &Path, source: csv::Error) -> ReadError {
    ReadError::Csv {
        path: path.to_path_buf(),
        source,
    }
}
