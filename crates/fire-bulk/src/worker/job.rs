use std::path::PathBuf;

use crate::error::DiscoveryError;
use crate::model::FileRecord;

/// One candidate file to classify and fingerprint.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub path: PathBuf,
}

impl ScanJob {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug)]
pub struct ScanResult {
    pub path: PathBuf,
    pub outcome: Result<FileRecord, DiscoveryError>,
}

impl ScanResult {
    pub fn is_match(&self) -> bool {
        self.outcome.is_ok()
    }
}
