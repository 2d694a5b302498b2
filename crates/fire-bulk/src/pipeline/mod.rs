//! Quarter organisation and batch processing.

pub mod config;
pub mod organizer;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use organizer::{BatchMode, PreparedBatch, QuarterOrganizer};
pub use progress::{
    BroadcastProgress, FnProgress, NoopProgress, ProgressEvent, ProgressKind, ProgressReporter,
};
pub use runner::{BatchOutcome, BatchProcessor, FailedFile, ScheduleRecords};
