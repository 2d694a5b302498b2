//! Schedule-code normalisation and the metric-code prefix grammar.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static RE_METRIC_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(RCON|RCFD|RIAD|RCFN|RCOA|RCOB|RCOC|RCOD)[A-Z0-9]+$").unwrap()
});

/// Schedules whose parts and sub-schedules all share one line-item table.
const COLLAPSED_SCHEDULES: [&str; 5] = ["RCR", "RCL", "RCO", "RCT", "RCN"];

/// Reduces a scanned schedule code to the key its line-item table is stored
/// under: `RCRI2` and `RCRII` both become `RCR`, `RCCI1` becomes `RCCI`.
pub fn normalize_schedule_code(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    if let Some(base) = COLLAPSED_SCHEDULES.iter().find(|base| code.starts_with(*base)) {
        return (*base).to_string();
    }
    code.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Whether a column header names a reported metric.
pub fn is_metric_column(header: &str) -> bool {
    RE_METRIC_COLUMN.is_match(header)
}

/// The closed set of 4-letter metric-code prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricPrefix {
    Rcon,
    Rcfd,
    Riad,
    Rcfn,
    Rcoa,
    Rcob,
    Rcoc,
    Rcod,
}

impl MetricPrefix {
    pub const ALL: [MetricPrefix; 8] = [
        MetricPrefix::Rcon,
        MetricPrefix::Rcfd,
        MetricPrefix::Riad,
        MetricPrefix::Rcfn,
        MetricPrefix::Rcoa,
        MetricPrefix::Rcob,
        MetricPrefix::Rcoc,
        MetricPrefix::Rcod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricPrefix::Rcon => "RCON",
            MetricPrefix::Rcfd => "RCFD",
            MetricPrefix::Riad => "RIAD",
            MetricPrefix::Rcfn => "RCFN",
            MetricPrefix::Rcoa => "RCOA",
            MetricPrefix::Rcob => "RCOB",
            MetricPrefix::Rcoc => "RCOC",
            MetricPrefix::Rcod => "RCOD",
        }
    }

    /// Human label used when a code has no dictionary description.
    pub fn label(&self) -> &'static str {
        match self {
            MetricPrefix::Rcon => "Domestic",
            MetricPrefix::Rcfd => "Consolidated",
            MetricPrefix::Riad => "Income Statement",
            MetricPrefix::Rcfn => "Foreign",
            MetricPrefix::Rcoa => "Regulatory",
            MetricPrefix::Rcob => "Other",
            MetricPrefix::Rcoc => "Credit",
            MetricPrefix::Rcod => "Derivative",
        }
    }

    pub fn of(code: &str) -> Option<MetricPrefix> {
        let head = code.get(..4)?;
        Self::ALL.into_iter().find(|p| p.as_str() == head)
    }
}

impl fmt::Display for MetricPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
