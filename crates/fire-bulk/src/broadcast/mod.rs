//! Broadcasting for real-time batch progress.
//!
//! Any front end (CLI, service, desktop shell) can subscribe to the
//! broadcaster and render events as they arrive.

pub mod batch_progress;

pub use batch_progress::{BatchPhase, BatchProgressBroadcaster, BatchProgressEvent, BatchSummary};
