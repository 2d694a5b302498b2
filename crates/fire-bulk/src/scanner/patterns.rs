//! Filename registry: which schedule and reporting date a bulk file holds.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::DiscoveryError;

/// Schedules a complete quarterly Call Report bulk download contains, in
/// registry order.
pub const EXPECTED_SCHEDULES: [&str; 39] = [
    "GL", "RC", "RCA", "RCB", "RCCI", "RCCII", "RCD", "RCE", "RCEI", "RCEII", "RCF", "RCG", "RCH",
    "RCI", "RCK", "RCL", "RCM", "RCN", "RCO", "RCP", "RCQ", "RCRI", "RCRII", "RCS", "RCT", "RCV",
    "RI", "RIA", "RIBI", "RIBII", "RIC", "RID", "RIE", "CI", "ENT", "GI", "NARR", "SU", "POR",
];

static RE_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\s+of\s+(\d+)\)").unwrap());

static FFIEC_REGISTRY: LazyLock<ScheduleRegistry> = LazyLock::new(|| {
    let entries = EXPECTED_SCHEDULES.iter().map(|code| {
        let pattern = if *code == "POR" {
            r"(?i)FFIEC\s+CDR\s+Call\s+Bulk\s+POR\s+(\d{8})".to_string()
        } else {
            format!(r"(?i)FFIEC\s+CDR\s+Call\s+Schedule\s+{}\s+(\d{{8}})", code)
        };
        (code.to_string(), pattern)
    });
    ScheduleRegistry::from_patterns(entries).unwrap()
});

/// A filename the registry recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleMatch {
    /// Registry code, with the part number appended for multi-part files.
    pub schedule_code: String,
    pub report_date: NaiveDate,
    pub part: Option<(u32, u32)>,
}

/// Ordered schedule-code -> filename-pattern table. The first matching
/// pattern wins; each pattern's first capture group is the `MMDDYYYY` date.
#[derive(Debug, Clone)]
pub struct ScheduleRegistry {
    patterns: Vec<(String, Regex)>,
}

impl ScheduleRegistry {
    pub fn from_patterns<I>(entries: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let patterns = entries
            .into_iter()
            .map(|(code, pattern)| Regex::new(&pattern).map(|re| (code, re)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The FFIEC Call Report bulk naming scheme.
    pub fn ffiec() -> Self {
        FFIEC_REGISTRY.clone()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(code, _)| code.as_str())
    }

    pub fn classify(&self, filename: &str) -> Result<ScheduleMatch, DiscoveryError> {
        let (code, raw_date) = self
            .patterns
            .iter()
            .find_map(|(code, re)| {
                re.captures(filename)
                    .and_then(|caps| caps.get(1))
                    .map(|m| (code, m.as_str()))
            })
            .ok_or_else(|| DiscoveryError::UnknownSchedule {
                filename: filename.to_string(),
            })?;

        let report_date =
            parse_report_date(raw_date).ok_or_else(|| DiscoveryError::InvalidReportDate {
                filename: filename.to_string(),
                raw: raw_date.to_string(),
            })?;

        let part = RE_PART.captures(filename).and_then(|caps| {
            let index = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let total = caps.get(2)?.as_str().parse::<u32>().ok()?;
            Some((index, total))
        });

        let schedule_code = match part {
            Some((index, _)) => format!("{}{}", code, index),
            None => code.clone(),
        };

        Ok(ScheduleMatch {
            schedule_code,
            report_date,
            part,
        })
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::ffiec()
    }
}

/// Strict `MMDDYYYY`.
fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month: u32 = raw[0..2].parse().ok()?;
    let day: u32 = raw[2..4].parse().ok()?;
    let year: i32 = raw[4..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
