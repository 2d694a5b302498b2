//! Amount cell cleaning.

use std::sync::LazyLock;

use regex::Regex;

static RE_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d+(\.\d*)?|\.\d+)$").unwrap());

/// Cells that mean "nothing reported here".
const BLANK_MARKERS: [&str; 3] = [".", "NA", "N/A"];

/// "Not disclosed" sentinels: no data, not reported, confidential.
const SENTINELS: [&str; 3] = ["ND", "NR", "CONF"];

/// Classification of one raw metric cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountCell {
    Blank,
    Sentinel,
    /// Non-empty but not a number after cleaning.
    Invalid,
    /// Signed decimal string with separators removed.
    Value(String),
}

impl AmountCell {
    pub fn value(&self) -> Option<&str> {
        match self {
            AmountCell::Value(v) => Some(v),
            _ => None,
        }
    }
}

pub fn is_blank(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || BLANK_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// Cleans a raw cell: `(1,234)` becomes `-1234`, `1,234.50` becomes
/// `1234.50`, blanks and sentinels are classified rather than converted.
pub fn clean_amount(raw: &str) -> AmountCell {
    if is_blank(raw) {
        return AmountCell::Blank;
    }
    let trimmed = raw.trim();
    if SENTINELS.iter().any(|s| trimmed.eq_ignore_ascii_case(s)) {
        return AmountCell::Sentinel;
    }

    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let mut cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();

    if negative {
        if cleaned.starts_with('-') {
            return AmountCell::Invalid;
        }
        cleaned.insert(0, '-');
    }

    if RE_DECIMAL.is_match(&cleaned) {
        AmountCell::Value(cleaned)
    } else {
        AmountCell::Invalid
    }
}
