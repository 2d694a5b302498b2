use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::scanner::{analyze_file, ScheduleRegistry};
use crate::telemetry::Telemetry;
use crate::worker::job::{ScanJob, ScanResult};

/// Fixed-size pool of I/O-bound scan workers.
///
/// Jobs go through a bounded channel so a huge directory cannot queue
/// unbounded work; results come back unordered on an unbounded channel, so
/// submitting every job before reading any result cannot deadlock.
pub struct WorkerPool {
    job_sender: Sender<ScanJob>,
    result_receiver: Receiver<ScanResult>,
    workers: Vec<JoinHandle<()>>,
    telemetry: Telemetry,
}

impl WorkerPool {
    pub fn new(
        registry: Arc<ScheduleRegistry>,
        worker_count: usize,
        telemetry: Telemetry,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = bounded::<ScanJob>(worker_count * 2);
        let (result_sender, result_receiver) = unbounded::<ScanResult>();

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let worker_registry = Arc::clone(&registry);
            let worker_telemetry = telemetry.clone();

            let handle = thread::Builder::new()
                .name(format!("scan-worker-{}", worker_id))
                .spawn(move || {
                    worker_telemetry.in_scope(|| {
                        run_worker(worker_id, job_rx, result_tx, &worker_registry)
                    })
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        // Only workers hold result senders now, so the receiver disconnects
        // once every worker has exited.
        drop(result_sender);

        telemetry.in_scope(|| info!("Started {} scan workers", worker_count));

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            telemetry,
        })
    }

    pub fn submit(&self, job: ScanJob) -> Result<(), WorkerError> {
        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Closes the job queue, waits for every worker and returns all results
    /// not yet received.
    pub fn finish(self) -> Vec<ScanResult> {
        drop(self.job_sender);

        self.telemetry.in_scope(|| {
            for (i, worker) in self.workers.into_iter().enumerate() {
                if let Err(e) = worker.join() {
                    error!("Scan worker {} panicked: {:?}", i, e);
                } else {
                    debug!("Scan worker {} finished", i);
                }
            }
        });

        self.result_receiver.try_iter().collect()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<ScanJob>,
    result_sender: Sender<ScanResult>,
    registry: &ScheduleRegistry,
) {
    debug!("Scan worker {} started", worker_id);

    // Ends when `finish` drops the job sender.
    for job in job_receiver.iter() {
        let outcome = analyze_file(registry, &job.path);
        if let Err(e) = result_sender.send(ScanResult {
            path: job.path,
            outcome,
        }) {
            error!("Scan worker {} failed to send result: {}", worker_id, e);
            break;
        }
    }

    debug!("Scan worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(
            Arc::new(ScheduleRegistry::ffiec()),
            workers,
            Telemetry::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = WorkerPool::new(
            Arc::new(ScheduleRegistry::ffiec()),
            0,
            Telemetry::disabled(),
        );
        assert!(matches!(result, Err(WorkerError::SpawnFailed(_))));
    }

    #[test]
    fn test_finish_without_jobs() {
        assert!(pool(3).finish().is_empty());
    }

    #[test]
    fn test_more_jobs_than_queue_capacity() {
        let dir = TempDir::new().unwrap();
        let pool = pool(2);
        let mut expected = 0;
        for day in 1..=20u32 {
            let path = dir
                .path()
                .join(format!("FFIEC CDR Call Schedule RC 01{:02}2023.txt", day));
            fs::write(&path, format!("IDRSSD\tRCON2170\n{}\t1\n", day)).unwrap();
            pool.submit(ScanJob::new(path)).unwrap();
            expected += 1;
        }
        let unmatched = dir.path().join("readme.txt");
        fs::write(&unmatched, "x").unwrap();
        pool.submit(ScanJob::new(unmatched)).unwrap();

        let results = pool.finish();
        assert_eq!(results.len(), expected + 1);
        assert_eq!(results.iter().filter(|r| r.is_match()).count(), expected);
    }
}
