//! Batch progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::{ProgressEvent, ProgressKind};

/// Phase of a batch, per event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Started,
    ScheduleCompleted,
    ScheduleEmpty,
    ScheduleSkipped,
    ScheduleFailed,
    BatchComplete,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchPhase::Started => write!(f, "Started"),
            BatchPhase::ScheduleCompleted => write!(f, "Schedule completed"),
            BatchPhase::ScheduleEmpty => write!(f, "Schedule empty"),
            BatchPhase::ScheduleSkipped => write!(f, "Schedule skipped"),
            BatchPhase::ScheduleFailed => write!(f, "Schedule failed"),
            BatchPhase::BatchComplete => write!(f, "Batch complete"),
        }
    }
}

/// Serialisable progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressEvent {
    pub batch_id: String,
    pub current_file: usize,
    pub total_files: usize,
    pub current_schedule: String,
    pub schedule_name: String,
    pub percentage: f64,
    pub message: String,
    pub phase: BatchPhase,
    pub timestamp: DateTime<Utc>,
    pub schedule_completed: bool,
    pub schedule_failed: bool,
    pub batch_complete: bool,
    /// Records emitted (set on schedule completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completed/failed/skipped counts (set on the final event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchProgressEvent {
    pub fn from_progress(event: &ProgressEvent) -> Self {
        let (phase, rows, error, summary) = match &event.kind {
            ProgressKind::Started => (BatchPhase::Started, None, None, None),
            ProgressKind::ScheduleCompleted { rows } => {
                (BatchPhase::ScheduleCompleted, Some(*rows), None, None)
            }
            ProgressKind::ScheduleEmpty => (BatchPhase::ScheduleEmpty, Some(0), None, None),
            ProgressKind::ScheduleSkipped => (BatchPhase::ScheduleSkipped, None, None, None),
            ProgressKind::ScheduleFailed { error } => {
                (BatchPhase::ScheduleFailed, None, Some(error.clone()), None)
            }
            ProgressKind::BatchComplete {
                completed,
                failed,
                skipped,
            } => (
                BatchPhase::BatchComplete,
                None,
                None,
                Some(BatchSummary {
                    completed: *completed,
                    failed: *failed,
                    skipped: *skipped,
                }),
            ),
        };

        Self {
            batch_id: event.batch_id.clone(),
            current_file: event.current_file,
            total_files: event.total_files,
            current_schedule: event.current_schedule.clone(),
            schedule_name: event.schedule_name.clone(),
            percentage: event.percentage,
            message: event.message.clone(),
            phase,
            timestamp: Utc::now(),
            schedule_completed: event.schedule_completed(),
            schedule_failed: event.schedule_failed(),
            batch_complete: event.batch_complete(),
            rows,
            error,
            summary,
        }
    }
}

/// Broadcasts batch progress events to any number of subscribers.
#[derive(Clone)]
pub struct BatchProgressBroadcaster {
    sender: Arc<broadcast::Sender<BatchProgressEvent>>,
}

impl BatchProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: BatchProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BatchProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
