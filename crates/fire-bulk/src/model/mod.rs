//! Core data types shared across the pipeline.

pub mod canonical;
pub mod completeness;
pub mod file_record;
pub mod quarter;

pub use canonical::CanonicalRecord;
pub use completeness::Completeness;
pub use file_record::{FileRecord, FileStatus};
pub use quarter::{InvalidQuarter, QuarterKey};
