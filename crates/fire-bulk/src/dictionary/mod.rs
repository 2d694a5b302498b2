//! Code Dictionary: metric descriptions, per-schedule line items, schedule
//! metadata and institution names.
//!
//! Tables are loaded once (built-in JSON, optionally overlaid by files named
//! in the configuration) and are immutable afterwards, so one dictionary can
//! be shared by reference across every conversion worker.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DictionaryConfig;
use crate::error::DictionaryError;

pub mod schedule;

pub use schedule::{is_metric_column, normalize_schedule_code, MetricPrefix};

const BUILTIN_MDRM: &str = include_str!("../../data/mdrm_codes.json");
const BUILTIN_LINE_ITEMS: &str = include_str!("../../data/line_items.json");
const BUILTIN_SCHEDULES: &str = include_str!("../../data/schedules.json");
const BUILTIN_INSTITUTIONS: &str = include_str!("../../data/institutions.json");

/// Display metadata for one schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub name: String,
    /// Form label, e.g. `RC-N`.
    pub prefix: String,
    pub description: String,
}

/// MDRM description files come either flat or wrapped as an excerpt.
#[derive(Deserialize)]
#[serde(untagged)]
enum MdrmTable {
    Excerpt {
        #[serde(rename = "_sample_codes")]
        sample_codes: HashMap<String, String>,
    },
    Flat(HashMap<String, String>),
}

impl MdrmTable {
    fn into_codes(self) -> HashMap<String, String> {
        match self {
            MdrmTable::Excerpt { sample_codes } => sample_codes,
            MdrmTable::Flat(codes) => codes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeDictionary {
    descriptions: HashMap<String, String>,
    /// Normalised schedule code -> metric code -> line item. Sorted so the
    /// suffix fallback is deterministic.
    line_items: HashMap<String, BTreeMap<String, String>>,
    schedules: HashMap<String, ScheduleInfo>,
    institutions: HashMap<String, String>,
}

impl CodeDictionary {
    /// Dictionary built from the tables compiled into the crate.
    pub fn builtin() -> Result<Self, DictionaryError> {
        let dictionary = Self {
            descriptions: parse_mdrm(BUILTIN_MDRM)?,
            line_items: parse_table(BUILTIN_LINE_ITEMS, "line item")?,
            schedules: parse_table(BUILTIN_SCHEDULES, "schedule")?,
            institutions: parse_table(BUILTIN_INSTITUTIONS, "institution")?,
        };
        Ok(dictionary)
    }

    /// Built-in tables overlaid with any files named in `config`. Entries
    /// from files replace built-in entries with the same key.
    pub fn load(config: &DictionaryConfig) -> Result<Self, DictionaryError> {
        let mut dictionary = Self::builtin()?;

        if let Some(ref path) = config.mdrm_path {
            dictionary.descriptions.extend(parse_mdrm(&read(path)?)?);
        }
        if let Some(ref path) = config.line_items_path {
            let tables: HashMap<String, BTreeMap<String, String>> =
                parse_table(&read(path)?, "line item")?;
            for (schedule, items) in tables {
                dictionary
                    .line_items
                    .entry(normalize_schedule_code(&schedule))
                    .or_default()
                    .extend(items);
            }
        }
        if let Some(ref path) = config.schedules_path {
            dictionary
                .schedules
                .extend(parse_table::<HashMap<String, ScheduleInfo>>(&read(path)?, "schedule")?);
        }
        if let Some(ref path) = config.institutions_path {
            dictionary
                .institutions
                .extend(parse_table::<HashMap<String, String>>(&read(path)?, "institution")?);
        }

        tracing::info!(
            descriptions = dictionary.descriptions.len(),
            line_items = dictionary.line_items.values().map(BTreeMap::len).sum::<usize>(),
            schedules = dictionary.schedules.len(),
            institutions = dictionary.institutions.len(),
            "Code dictionary loaded"
        );

        Ok(dictionary)
    }

    /// Dictionary description for a metric code, if any.
    pub fn description(&self, code: &str) -> Option<&str> {
        self.descriptions
            .get(code)
            .map(String::as_str)
            .filter(|d| !d.trim().is_empty())
    }

    /// Fallback for codes the dictionary has no description for, built from
    /// the code's prefix and the schedule name. Never empty.
    pub fn synthesized_description(&self, code: &str, schedule_code: &str) -> String {
        let label = match MetricPrefix::of(code) {
            Some(prefix) => prefix.label(),
            None => code.get(..4).unwrap_or(code),
        };
        format!("{} item - {}", label, self.schedule_name(schedule_code))
    }

    /// Hierarchical line item for `code` within a schedule, or `""`.
    ///
    /// Exact code first, then any code in the schedule's table ending with
    /// the same suffix after the 4-letter prefix (`RCFD2170` finds `RCON2170`).
    pub fn line_item(&self, schedule_code: &str, code: &str) -> &str {
        let Some(table) = self.line_items.get(&normalize_schedule_code(schedule_code)) else {
            return "";
        };
        if let Some(item) = table.get(code) {
            return item;
        }

        let suffix = code.get(4..).filter(|s| !s.is_empty()).unwrap_or(code);
        table
            .iter()
            .find(|(candidate, _)| candidate.ends_with(suffix))
            .map(|(_, item)| item.as_str())
            .unwrap_or("")
    }

    /// Metadata for a schedule code as scanned (`RCRI2`), falling back to the
    /// code without its part number and then to the normalised code.
    pub fn schedule(&self, schedule_code: &str) -> Option<&ScheduleInfo> {
        let upper = schedule_code.trim().to_ascii_uppercase();
        self.schedules
            .get(&upper)
            .or_else(|| {
                self.schedules
                    .get(upper.trim_end_matches(|c: char| c.is_ascii_digit()))
            })
            .or_else(|| self.schedules.get(&normalize_schedule_code(&upper)))
    }

    /// Display name for a schedule, or the code itself when unknown.
    pub fn schedule_name(&self, schedule_code: &str) -> String {
        self.schedule(schedule_code)
            .map(|info| info.name.clone())
            .unwrap_or_else(|| schedule_code.to_string())
    }

    pub fn institution_name(&self, rssd_id: &str) -> String {
        self.institutions
            .get(rssd_id)
            .cloned()
            .unwrap_or_else(|| format!("Institution {}", rssd_id))
    }
}

fn read(path: &Path) -> Result<String, DictionaryError> {
    std::fs::read_to_string(path).map_err(|e| DictionaryError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_mdrm(content: &str) -> Result<HashMap<String, String>, DictionaryError> {
    serde_json::from_str::<MdrmTable>(content)
        .map(MdrmTable::into_codes)
        .map_err(|e| DictionaryError::Parse {
            table: "MDRM",
            source: e,
        })
}

fn parse_table<T: serde::de::DeserializeOwned>(
    content: &str,
    table: &'static str,
) -> Result<T, DictionaryError> {
    serde_json::from_str(content).map_err(|e| DictionaryError::Parse { table, source: e })
}
