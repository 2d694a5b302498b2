pub mod broadcast;
pub mod canonical;
pub mod config;
pub mod db;
pub mod dictionary;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod sanitize;
pub mod scanner;
pub mod telemetry;
pub mod worker;

pub use broadcast::{BatchProgressBroadcaster, BatchProgressEvent};
pub use canonical::{Canonicalizer, Conversion, ConversionStats};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use dictionary::CodeDictionary;
pub use error::{
    ConfigError, DictionaryError, DiscoveryError, FireBulkError, OrganizerError, PipelineError,
    ReadError, Result, WorkerError,
};
pub use model::{CanonicalRecord, Completeness, FileRecord, FileStatus, QuarterKey};
pub use pipeline::{BatchOutcome, BatchProcessor, PipelineConfig, PreparedBatch, QuarterOrganizer};
pub use scanner::{DirectoryScanner, ScanReport};
pub use telemetry::Telemetry;
