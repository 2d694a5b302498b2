use serde::Serialize;

use crate::broadcast::{BatchProgressBroadcaster, BatchProgressEvent};

/// What happened to the file (or batch) an event refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProgressKind {
    Started,
    ScheduleCompleted { rows: u64 },
    /// Completed with no records, e.g. the institution filter matched nothing.
    ScheduleEmpty,
    ScheduleSkipped,
    ScheduleFailed { error: String },
    BatchComplete {
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Events emitted by the batch processor, one or two per file plus a final
/// summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub batch_id: String,
    /// 1-based position of the file in the batch.
    pub current_file: usize,
    pub total_files: usize,
    pub current_schedule: String,
    pub schedule_name: String,
    pub percentage: f64,
    pub message: String,
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn schedule_completed(&self) -> bool {
        matches!(
            self.kind,
            ProgressKind::ScheduleCompleted { .. } | ProgressKind::ScheduleEmpty
        )
    }

    pub fn schedule_failed(&self) -> bool {
        matches!(self.kind, ProgressKind::ScheduleFailed { .. })
    }

    pub fn batch_complete(&self) -> bool {
        matches!(self.kind, ProgressKind::BatchComplete { .. })
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// No-op reporter for callers that do not track progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Adapts a closure.
pub struct FnProgress<F>(pub F);

impl<F> ProgressReporter for FnProgress<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

/// Forwards pipeline events to a broadcast channel.
pub struct BroadcastProgress {
    broadcaster: BatchProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: BatchProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: &ProgressEvent) {
        self.broadcaster.send(BatchProgressEvent::from_progress(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            batch_id: "b-1".to_string(),
            current_file: 1,
            total_files: 2,
            current_schedule: "RC".to_string(),
            schedule_name: "Balance Sheet".to_string(),
            percentage: 50.0,
            message: "Processing RC".to_string(),
            kind,
        }
    }

    #[test]
    fn test_derived_flags() {
        assert!(event(ProgressKind::ScheduleCompleted { rows: 3 }).schedule_completed());
        assert!(event(ProgressKind::ScheduleEmpty).schedule_completed());
        assert!(!event(ProgressKind::Started).schedule_completed());
        assert!(event(ProgressKind::ScheduleFailed { error: "x".into() }).schedule_failed());
        let done = event(ProgressKind::BatchComplete {
            completed: 1,
            failed: 1,
            skipped: 0,
        });
        assert!(done.batch_complete());
        assert!(!done.schedule_failed());
    }

    #[test]
    fn test_fn_progress_forwards() {
        let seen = Mutex::new(Vec::new());
        let reporter = FnProgress(|e: &ProgressEvent| seen.lock().unwrap().push(e.current_schedule.clone()));
        reporter.report(&event(ProgressKind::Started));
        assert_eq!(*seen.lock().unwrap(), vec!["RC".to_string()]);
    }

    #[test]
    fn test_broadcast_progress() {
        let broadcaster = BatchProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let reporter = BroadcastProgress::new(broadcaster);

        reporter.report(&event(ProgressKind::ScheduleFailed {
            error: "bad header".into(),
        }));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.batch_id, "b-1");
        assert!(received.schedule_failed);
        assert_eq!(received.error.as_deref(), Some("bad header"));
    }
}
