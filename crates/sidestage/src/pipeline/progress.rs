use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobPhase, JobProgressEvent, JobProgressTracker};

/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        phase: JobPhase,
        message: String,
    },
    /// Transfer fraction; never decreases within a job.
    Transfer {
        fraction: f64,
    },
    Completed {
        bundle_path: String,
        bundle_identifier: String,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. } | ProgressEvent::Cancelled
        )
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and headless callers.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to a broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, owner_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, owner_id, sender),
        }
    }
}

impl From<JobProgressTracker> for BroadcastProgress {
    fn from(tracker: JobProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => self.tracker.update_phase(phase, &message),
            ProgressEvent::Transfer { fraction } => self.tracker.transfer(fraction),
            ProgressEvent::Completed {
                bundle_path,
                bundle_identifier,
            } => self.tracker.completed(&bundle_path, &bundle_identifier),
            ProgressEvent::Failed { error } => self.tracker.failed(&error),
            ProgressEvent::Cancelled => self.tracker.cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{JobProgressBroadcaster, JobStatus};

    #[test]
    fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new("job", "owner", broadcaster.sender());

        progress.report(ProgressEvent::Transfer { fraction: 0.3 });
        progress.report(ProgressEvent::Cancelled);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.fraction, Some(0.3));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_started_job_forwards_after_queued() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::from(broadcaster.start_job("job", "owner"));

        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Importing,
            message: "Copying archive".to_string(),
        });

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.phase, JobPhase::Queued);
        assert_eq!(queued.job_id, "job");
        let importing = rx.try_recv().unwrap();
        assert_eq!(importing.phase, JobPhase::Importing);
        assert_eq!(importing.owner_id, "owner");
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::Cancelled.is_terminal());
        assert!(!ProgressEvent::Transfer { fraction: 1.0 }.is_terminal());
    }
}
