use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;
use crate::scanner::EXPECTED_SCHEDULES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Ledger location. `~/` is expanded; `None` means `~/.fire_cache/bulk_files.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default = "default_expected_schedules")]
    pub expected_schedules: Vec<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_expected_schedules() -> Vec<String> {
    EXPECTED_SCHEDULES.iter().map(|s| s.to_string()).collect()
}

fn default_retention_days() -> u32 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            dictionary: DictionaryConfig::default(),
            scan: ScanConfig::default(),
            convert: ConvertConfig::default(),
            expected_schedules: default_expected_schedules(),
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// The configured ledger path with `~/` expanded, or the default path.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_home(path)),
            None => default_database_path(),
        }
    }
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Optional dictionary files overlaid on the built-in tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionaryConfig {
    #[serde(default)]
    pub mdrm_path: Option<PathBuf>,
    #[serde(default)]
    pub line_items_path: Option<PathBuf>,
    #[serde(default)]
    pub schedules_path: Option<PathBuf>,
    #[serde(default)]
    pub institutions_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
}

fn default_scan_workers() -> usize {
    4
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_scan_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    #[serde(default = "default_convert_workers")]
    pub workers: usize,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    /// Files above this size are converted in parallel chunks.
    #[serde(default = "default_large_file_bytes")]
    pub large_file_bytes: u64,
}

fn default_convert_workers() -> usize {
    num_cpus::get()
}

fn default_chunk_rows() -> usize {
    10_000
}

fn default_large_file_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            workers: default_convert_workers(),
            chunk_rows: default_chunk_rows(),
            large_file_bytes: default_large_file_bytes(),
        }
    }
}
