use std::time::Duration;

use crate::config::{Config, ConvertConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub expected_schedules: Vec<String>,
    pub scan_workers: usize,
    pub convert: ConvertConfig,
    /// Stop starting new files once a batch has run this long.
    pub time_budget: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            expected_schedules: config.expected_schedules.clone(),
            scan_workers: config.scan.workers,
            convert: config.convert.clone(),
            time_budget: None,
        }
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
