use serde::{Deserialize, Serialize};

/// One long-format output row: a single reported figure for one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// RSSD ID exactly as it appears in the source row (kept as text).
    pub rssd_id: String,
    pub institution_name: String,
    /// Dotted line item within the schedule (`RC.12`), empty when unmapped.
    pub line_item: String,
    pub description: String,
    /// Column header the value came from (`RCON2170`).
    pub metric_code: String,
    /// Signed decimal string, thousands separators removed.
    pub amount: String,
}
