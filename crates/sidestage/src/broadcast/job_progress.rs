//! Job progress broadcaster for real-time acquisition status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of an acquisition job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Transferring,
    Importing,
    Extracting,
    Registering,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Transferring => write!(f, "Downloading"),
            JobPhase::Importing => write!(f, "Importing"),
            JobPhase::Extracting => write!(f, "Extracting"),
            JobPhase::Registering => write!(f, "Registering"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl From<JobPhase> for JobStatus {
    fn from(phase: JobPhase) -> Self {
        match phase {
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            JobPhase::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Processing,
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Catalog identifier the job will register under.
    pub owner_id: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Transfer fraction in [0, 1]; only present while transferring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
    /// Bundle location (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    /// Bundle identifier (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_identifier: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, owner_id: &str, phase: JobPhase, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
            phase,
            status: phase.into(),
            message: message.to_string(),
            timestamp: Utc::now(),
            fraction: None,
            bundle_path: None,
            bundle_identifier: None,
            error: None,
        }
    }

    pub fn transfer(job_id: &str, owner_id: &str, fraction: f64) -> Self {
        let mut event = Self::new(job_id, owner_id, JobPhase::Transferring, "Downloading");
        event.fraction = Some(fraction);
        event
    }

    pub fn completed(
        job_id: &str,
        owner_id: &str,
        bundle_path: &str,
        bundle_identifier: &str,
    ) -> Self {
        let mut event = Self::new(
            job_id,
            owner_id,
            JobPhase::Completed,
            "Application ready",
        );
        event.bundle_path = Some(bundle_path.to_string());
        event.bundle_identifier = Some(bundle_identifier.to_string());
        event
    }

    pub fn failed(job_id: &str, owner_id: &str, error: &str) -> Self {
        let mut event = Self::new(job_id, owner_id, JobPhase::Failed, "Acquisition failed");
        event.error = Some(error.to_string());
        event
    }

    pub fn cancelled(job_id: &str, owner_id: &str) -> Self {
        Self::new(job_id, owner_id, JobPhase::Cancelled, "Cancelled")
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job and announces it as queued.
    pub fn start_job(&self, job_id: &str, owner_id: &str) -> JobProgressTracker {
        let tracker = JobProgressTracker::new(job_id, owner_id, Arc::clone(&self.sender));
        tracker.update_phase(JobPhase::Queued, "Job queued");
        tracker
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    owner_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(
        job_id: &str,
        owner_id: &str,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
            sender,
        }
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let _ = self.sender.send(JobProgressEvent::new(
            &self.job_id,
            &self.owner_id,
            phase,
            message,
        ));
    }

    pub fn transfer(&self, fraction: f64) {
        let _ = self
            .sender
            .send(JobProgressEvent::transfer(&self.job_id, &self.owner_id, fraction));
    }

    pub fn completed(&self, bundle_path: &str, bundle_identifier: &str) {
        let _ = self.sender.send(JobProgressEvent::completed(
            &self.job_id,
            &self.owner_id,
            bundle_path,
            bundle_identifier,
        ));
    }

    pub fn failed(&self, error: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::failed(&self.job_id, &self.owner_id, error));
    }

    pub fn cancelled(&self) {
        let _ = self
            .sender
            .send(JobProgressEvent::cancelled(&self.job_id, &self.owner_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster
            .sender()
            .send(JobProgressEvent::new(
                "job",
                "owner",
                JobPhase::Extracting,
                "Unpacking",
            ))
            .unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job");
        assert_eq!(received.owner_id, "owner");
        assert_eq!(received.phase, JobPhase::Extracting);
        assert_eq!(received.status, JobStatus::Processing);
        assert_eq!(received.fraction, None);
    }

    #[test]
    fn test_start_job_announces_queued() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start_job("job-1", "owner-1");
        assert_eq!(rx.try_recv().unwrap().phase, JobPhase::Queued);

        tracker.transfer(0.25);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Transferring);
        assert_eq!(received.fraction, Some(0.25));
    }

    #[test]
    fn test_terminal_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.start_job("job-2", "owner-2");
        let _ = rx.try_recv();

        tracker.completed("/staging/job-2/Demo.app", "com.example.demo");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.bundle_identifier.as_deref(), Some("com.example.demo"));

        tracker.failed("Extraction failed: crc mismatch");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.error.as_deref(), Some("Extraction failed: crc mismatch"));

        tracker.cancelled();
        assert_eq!(rx.try_recv().unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::transfer("job", "owner", 0.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job");
        assert_eq!(json["phase"], "transferring");
        assert_eq!(json["fraction"], 0.5);
        assert!(json.get("bundlePath").is_none());
    }
}
