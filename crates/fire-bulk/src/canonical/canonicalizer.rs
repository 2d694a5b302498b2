use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::ConvertConfig;
use crate::dictionary::CodeDictionary;
use crate::error::{PipelineError, ReadError};
use crate::model::CanonicalRecord;
use crate::sanitize::redact_path;
use crate::telemetry::Telemetry;

use super::amount::{clean_amount, is_blank, AmountCell};
use super::reader::{BulkReader, ColumnLayout};

/// Number of institution IDs listed when a filter matches nothing.
const TOP_INSTITUTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum QualityIssue {
    NoDataRows,
    NoMetricColumns,
    LowDensity(f64),
    VeryLowDensity(f64),
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityIssue::NoDataRows => write!(f, "No data rows found"),
            QualityIssue::NoMetricColumns => write!(f, "No metric code columns found"),
            QualityIssue::LowDensity(d) => write!(f, "Low data density: {:.1}%", d),
            QualityIssue::VeryLowDensity(d) => write!(f, "Very low data density: {:.1}%", d),
        }
    }
}

/// Per-file conversion diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionStats {
    pub rows_read: u64,
    pub rows_matched: u64,
    pub rows_without_id: u64,
    pub records_emitted: u64,
    pub blank_cells: u64,
    pub sentinel_cells: u64,
    pub invalid_amounts: u64,
    pub unmapped_descriptions: u64,
    pub metric_columns: u64,
    pub non_empty_cells: u64,
    pub quality_issues: Vec<QualityIssue>,
}

impl ConversionStats {
    /// Share of metric cells that hold anything, in percent.
    pub fn density(&self) -> f64 {
        let total = self.rows_read * self.metric_columns;
        if total == 0 {
            return 0.0;
        }
        self.non_empty_cells as f64 / total as f64 * 100.0
    }

    fn absorb(&mut self, other: &ConversionStats) {
        self.rows_read += other.rows_read;
        self.rows_matched += other.rows_matched;
        self.rows_without_id += other.rows_without_id;
        self.records_emitted += other.records_emitted;
        self.blank_cells += other.blank_cells;
        self.sentinel_cells += other.sentinel_cells;
        self.invalid_amounts += other.invalid_amounts;
        self.unmapped_descriptions += other.unmapped_descriptions;
        self.non_empty_cells += other.non_empty_cells;
    }

    fn assess_quality(&mut self) {
        self.quality_issues.clear();
        if self.rows_read == 0 {
            self.quality_issues.push(QualityIssue::NoDataRows);
            return;
        }
        if self.metric_columns == 0 {
            self.quality_issues.push(QualityIssue::NoMetricColumns);
            return;
        }
        let density = self.density();
        if density < 1.0 {
            self.quality_issues.push(QualityIssue::VeryLowDensity(density));
        } else if density < 10.0 {
            self.quality_issues.push(QualityIssue::LowDensity(density));
        }
    }
}

/// Output of converting one file.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub records: Vec<CanonicalRecord>,
    pub stats: ConversionStats,
    pub institution_count: u64,
    pub institution_filter: Option<String>,
}

impl Conversion {
    /// A filter was given and no row carried that institution.
    pub fn filter_matched_nothing(&self) -> bool {
        self.institution_filter.is_some() && self.stats.rows_matched == 0
    }
}

/// Row IDs are compared trimmed, so the filter is too. A blank filter
/// means no filter.
fn normalize_filter(filter: Option<&str>) -> Option<&str> {
    filter.map(str::trim).filter(|f| !f.is_empty())
}

/// Resolved metadata for one metric column, computed once per file.
struct MetricColumn {
    index: usize,
    code: String,
    line_item: String,
    description: String,
    mapped: bool,
}

#[derive(Default)]
struct ChunkOutput {
    records: Vec<CanonicalRecord>,
    stats: ConversionStats,
    institutions: HashSet<String>,
    id_counts: HashMap<String, u64>,
}

/// Wide-to-long converter for bulk files.
///
/// Rows are independent, so a large file is read `chunk_rows * workers`
/// rows at a time and each slab is split across the conversion pool. Small
/// files are converted in one pass on the calling thread. Both paths yield
/// records in source row order.
pub struct Canonicalizer {
    dictionary: Arc<CodeDictionary>,
    chunk_rows: usize,
    large_file_bytes: u64,
    workers: usize,
    pool: rayon::ThreadPool,
    telemetry: Telemetry,
}

impl Canonicalizer {
    pub fn new(
        dictionary: Arc<CodeDictionary>,
        config: &ConvertConfig,
        telemetry: Telemetry,
    ) -> Result<Self, PipelineError> {
        let workers = config.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("convert-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        Ok(Self {
            dictionary,
            chunk_rows: config.chunk_rows.max(1),
            large_file_bytes: config.large_file_bytes,
            workers,
            pool,
            telemetry: telemetry.for_component("canonicalizer"),
        })
    }

    pub fn dictionary(&self) -> &CodeDictionary {
        &self.dictionary
    }

    /// Converts already-read rows.
    pub fn convert(
        &self,
        layout: &ColumnLayout,
        rows: &[StringRecord],
        schedule_code: &str,
        institution_filter: Option<&str>,
    ) -> Conversion {
        let institution_filter = normalize_filter(institution_filter);
        self.telemetry.in_scope(|| {
            let columns = self.resolve_columns(layout, schedule_code);
            let output = self.convert_rows(layout, &columns, rows, institution_filter);
            self.finish(layout, vec![output], institution_filter)
        })
    }

    /// Reads and converts one bulk file.
    pub fn convert_file(
        &self,
        path: &Path,
        schedule_code: &str,
        institution_filter: Option<&str>,
    ) -> Result<Conversion, ReadError> {
        let institution_filter = normalize_filter(institution_filter);
        self.telemetry.in_scope(|| -> Result<Conversion, ReadError> {
            let span = info_span!("convert", file = %redact_path(path), schedule = schedule_code);
            let _enter = span.enter();

            let size = std::fs::metadata(path)
                .map_err(|e| ReadError::Open {
                    path: path.to_path_buf(),
                    source: e,
                })?
                .len();

            let mut reader = BulkReader::open(path)?;
            let layout = reader.layout().clone();
            let columns = self.resolve_columns(&layout, schedule_code);

            let mut outputs = Vec::new();
            if size > self.large_file_bytes {
                info!(
                    "Large file ({:.1} MB), converting in chunks of {} rows",
                    size as f64 / (1024.0 * 1024.0),
                    self.chunk_rows
                );
                loop {
                    let slab = reader.read_chunk(self.chunk_rows * self.workers)?;
                    if slab.is_empty() {
                        break;
                    }
                    outputs.extend(self.convert_parallel(
                        &layout,
                        &columns,
                        &slab,
                        institution_filter,
                    ));
                    debug!(
                        "Converted {} rows so far",
                        outputs.iter().map(|o| o.stats.rows_read).sum::<u64>()
                    );
                }
            } else {
                let rows = reader.read_all()?;
                outputs.push(self.convert_rows(&layout, &columns, &rows, institution_filter));
            }

            Ok(self.finish(&layout, outputs, institution_filter))
        })
    }

    fn convert_parallel(
        &self,
        layout: &ColumnLayout,
        columns: &[MetricColumn],
        rows: &[StringRecord],
        institution_filter: Option<&str>,
    ) -> Vec<ChunkOutput> {
        self.pool.install(|| {
            rows.par_chunks(self.chunk_rows)
                .map(|chunk| {
                    self.telemetry
                        .in_scope(|| self.convert_rows(layout, columns, chunk, institution_filter))
                })
                .collect()
        })
    }

    fn resolve_columns(&self, layout: &ColumnLayout, schedule_code: &str) -> Vec<MetricColumn> {
        layout
            .metric_columns()
            .iter()
            .map(|&index| {
                let code = layout.header(index).to_string();
                let (description, mapped) = match self.dictionary.description(&code) {
                    Some(d) => (d.to_string(), true),
                    None => (self.dictionary.synthesized_description(&code, schedule_code), false),
                };
                MetricColumn {
                    index,
                    line_item: self.dictionary.line_item(schedule_code, &code).to_string(),
                    description,
                    mapped,
                    code,
                }
            })
            .collect()
    }

    fn convert_rows(
        &self,
        layout: &ColumnLayout,
        columns: &[MetricColumn],
        rows: &[StringRecord],
        institution_filter: Option<&str>,
    ) -> ChunkOutput {
        let mut out = ChunkOutput::default();

        for row in rows {
            out.stats.rows_read += 1;
            out.stats.non_empty_cells += columns
                .iter()
                .filter(|c| !is_blank(row.get(c.index).unwrap_or("")))
                .count() as u64;

            let rssd_id = row.get(layout.id_column()).unwrap_or("").trim();
            if rssd_id.is_empty() {
                out.stats.rows_without_id += 1;
                continue;
            }

            if let Some(filter) = institution_filter {
                *out.id_counts.entry(rssd_id.to_string()).or_default() += 1;
                if rssd_id != filter {
                    continue;
                }
            }

            out.stats.rows_matched += 1;
            out.institutions.insert(rssd_id.to_string());
            let institution_name = self.dictionary.institution_name(rssd_id);

            for column in columns {
                match clean_amount(row.get(column.index).unwrap_or("")) {
                    AmountCell::Blank => out.stats.blank_cells += 1,
                    AmountCell::Sentinel => out.stats.sentinel_cells += 1,
                    AmountCell::Invalid => {
                        out.stats.invalid_amounts += 1;
                        debug!(
                            "Invalid amount {:?} for {} (institution {})",
                            row.get(column.index).unwrap_or(""),
                            column.code,
                            rssd_id
                        );
                    }
                    AmountCell::Value(amount) => {
                        if !column.mapped {
                            out.stats.unmapped_descriptions += 1;
                        }
                        out.records.push(CanonicalRecord {
                            rssd_id: rssd_id.to_string(),
                            institution_name: institution_name.clone(),
                            line_item: column.line_item.clone(),
                            description: column.description.clone(),
                            metric_code: column.code.clone(),
                            amount,
                        });
                    }
                }
            }
        }

        out.stats.records_emitted = out.records.len() as u64;
        out
    }

    fn finish(
        &self,
        layout: &ColumnLayout,
        outputs: Vec<ChunkOutput>,
        institution_filter: Option<&str>,
    ) -> Conversion {
        let mut conversion = Conversion {
            institution_filter: institution_filter.map(str::to_string),
            ..Default::default()
        };
        conversion.stats.metric_columns = layout.metric_columns().len() as u64;

        let mut institutions = HashSet::new();
        let mut id_counts: HashMap<String, u64> = HashMap::new();
        for output in outputs {
            conversion.stats.absorb(&output.stats);
            conversion.records.extend(output.records);
            institutions.extend(output.institutions);
            for (id, count) in output.id_counts {
                *id_counts.entry(id).or_default() += count;
            }
        }
        conversion.institution_count = institutions.len() as u64;
        conversion.stats.assess_quality();

        for issue in &conversion.stats.quality_issues {
            warn!("Data quality issue: {}", issue);
        }
        if conversion.stats.invalid_amounts > 0 {
            warn!("Found {} invalid amount values", conversion.stats.invalid_amounts);
        }

        if let Some(filter) = institution_filter {
            if conversion.stats.rows_matched == 0 {
                warn!("No data found for RSSD ID {}", filter);
                log_top_institutions(id_counts);
            }
        }

        info!(
            rows = conversion.stats.rows_read,
            matched = conversion.stats.rows_matched,
            skipped_cells = conversion.stats.blank_cells + conversion.stats.sentinel_cells,
            "Converted to {} canonical records",
            conversion.records.len()
        );

        conversion
    }
}

fn log_top_institutions(id_counts: HashMap<String, u64>) {
    let mut counts: Vec<(String, u64)> = id_counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    info!("Available RSSD IDs in file (top {}):", TOP_INSTITUTIONS);
    for (id, count) in counts.into_iter().take(TOP_INSTITUTIONS) {
        info!("  {}: {} rows", id, count);
    }
}
