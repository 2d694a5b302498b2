pub mod job;
pub mod pool;

pub use job::{ScanJob, ScanResult};
pub use pool::WorkerPool;
