//! Builders for bulk file content and pipeline configuration.

#![allow(dead_code)]

use fire_bulk::config::ConvertConfig;
use fire_bulk::PipelineConfig;

/// Builds the text of one tab-delimited FFIEC bulk file.
pub struct BulkFileBuilder {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    description_row: bool,
}

impl BulkFileBuilder {
    /// Starts a file whose first column is `IDRSSD`.
    pub fn new() -> Self {
        Self {
            columns: vec!["IDRSSD".to_string()],
            rows: vec![],
            description_row: false,
        }
    }

    /// Start with a raw header, e.g. one missing the identifier column.
    pub fn with_header(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![],
            description_row: false,
        }
    }

    /// Append metric (or other) columns after the existing ones.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Add an institution row. `values` follow the identifier column.
    pub fn row(mut self, rssd_id: &str, values: &[&str]) -> Self {
        let mut row = vec![rssd_id.to_string()];
        row.extend(values.iter().map(|v| v.to_string()));
        self.rows.push(row);
        self
    }

    /// Add the second header line the FFIEC files carry, which has a blank
    /// identifier cell.
    pub fn description_row(mut self) -> Self {
        self.description_row = true;
        self
    }

    pub fn build(&self) -> String {
        let mut out = self.columns.join("\t");
        out.push('\n');
        if self.description_row {
            let mut descriptions = vec![String::new()];
            descriptions.extend(
                self.columns
                    .iter()
                    .skip(1)
                    .map(|c| format!("Description of {}", c)),
            );
            out.push_str(&descriptions.join("\t"));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }
}

impl Default for BulkFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A small single-institution file for schedules whose content does not matter.
pub fn minimal_file(rssd_id: &str) -> String {
    BulkFileBuilder::new()
        .columns(&["RCON2170"])
        .row(rssd_id, &["100"])
        .build()
}

/// Builder for `PipelineConfig` with test-sized defaults.
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig {
                expected_schedules: vec!["RC".into(), "RCN".into(), "RI".into()],
                scan_workers: 2,
                convert: ConvertConfig {
                    workers: 2,
                    chunk_rows: 2,
                    large_file_bytes: 5 * 1024 * 1024,
                },
                time_budget: None,
            },
        }
    }

    pub fn expected_schedules(mut self, codes: &[&str]) -> Self {
        self.config.expected_schedules = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Forces the chunked conversion path for any file larger than `bytes`.
    pub fn large_file_bytes(mut self, bytes: u64) -> Self {
        self.config.convert.large_file_bytes = bytes;
        self
    }

    pub fn chunk_rows(mut self, rows: usize) -> Self {
        self.config.convert.chunk_rows = rows;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
