//! Canonicalizer: turns one wide bulk file (one row per institution, one
//! column per metric code) into enriched long-format records.

pub mod amount;
pub mod canonicalizer;
pub mod reader;

pub use amount::{clean_amount, AmountCell};
pub use canonicalizer::{Canonicalizer, Conversion, ConversionStats, QualityIssue};
pub use reader::{BulkReader, ColumnLayout, INSTITUTION_COLUMN};
