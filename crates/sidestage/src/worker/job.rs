use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::registrar::CatalogRecord;

/// Where the archive for a job comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Remote(String),
    Local(PathBuf),
}

impl SourceDescriptor {
    /// Label stored alongside the catalog entry.
    pub fn label(&self) -> &'static str {
        match self {
            SourceDescriptor::Remote(_) => "Downloaded",
            SourceDescriptor::Local(_) => "Imported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Transferring,
    Importing,
    Extracting,
    Registering,
    Completed,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed(_) | JobState::Cancelled
        )
    }

    fn can_advance_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (_, _) if self.is_terminal() => false,
            (_, Failed(_)) | (_, Cancelled) => true,
            (Pending, Transferring) | (Pending, Importing) => true,
            (Transferring, Extracting) | (Importing, Extracting) => true,
            (Extracting, Registering) => true,
            (Registering, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Transferring => write!(f, "Transferring"),
            JobState::Importing => write!(f, "Importing"),
            JobState::Extracting => write!(f, "Extracting"),
            JobState::Registering => write!(f, "Registering"),
            JobState::Completed => write!(f, "Completed"),
            JobState::Failed(reason) => write!(f, "Failed ({})", reason),
            JobState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid job state transition from {from} to {to}")]
pub struct JobStateError {
    pub from: String,
    pub to: String,
}

/// One attempt to acquire, extract and register a single application bundle.
#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    pub job_id: String,
    pub owner_id: String,
    pub source: SourceDescriptor,
    workspace: Option<PathBuf>,
    state: JobState,
    progress: Option<f64>,
    cancel: CancellationToken,
}

impl AcquisitionJob {
    fn new_internal(job_id: String, owner_id: String, source: SourceDescriptor) -> Self {
        Self {
            job_id,
            owner_id,
            source,
            workspace: None,
            state: JobState::Pending,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a job for an archive fetched over the network.
    pub fn remote(owner_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new_internal(
            uuid::Uuid::new_v4().to_string(),
            owner_id.into(),
            SourceDescriptor::Remote(url.into()),
        )
    }

    /// Creates a job for an archive already on the local filesystem.
    pub fn local(owner_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new_internal(
            uuid::Uuid::new_v4().to_string(),
            owner_id.into(),
            SourceDescriptor::Local(path.into()),
        )
    }

    /// Creates a job with a caller-chosen id (blocking entry points receive one).
    pub fn with_id(
        job_id: impl Into<String>,
        owner_id: impl Into<String>,
        source: SourceDescriptor,
    ) -> Self {
        Self::new_internal(job_id.into(), owner_id.into(), source)
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    pub(crate) fn set_workspace(&mut self, workspace: PathBuf) {
        self.workspace = Some(workspace);
    }

    /// Transfer progress; only defined while transferring.
    pub fn progress(&self) -> Option<f64> {
        match self.state {
            JobState::Transferring => self.progress,
            _ => None,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Moves the job forward along its state machine.
    pub fn transition(&mut self, next: JobState) -> Result<(), JobStateError> {
        if !self.state.can_advance_to(&next) {
            return Err(JobStateError {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == JobState::Transferring {
            self.progress = Some(0.0);
        }
        self.state = next;
        Ok(())
    }

    /// Records a transfer fraction, clamped to [0,1] and never decreasing.
    /// Returns the stored value.
    pub fn record_progress(&mut self, fraction: f64) -> Option<f64> {
        if self.state != JobState::Transferring || !fraction.is_finite() {
            return self.progress();
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let current = self.progress.unwrap_or(0.0);
        self.progress = Some(current.max(fraction));
        self.progress
    }
}

/// Terminal result of a job, handed back to callers and the hot folder.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub owner_id: String,
    pub state: JobState,
    pub record: Option<CatalogRecord>,
    pub error: Option<crate::pipeline::AcquireError>,
}

impl JobOutcome {
    pub fn completed(job: &AcquisitionJob, record: CatalogRecord) -> Self {
        Self {
            job_id: job.job_id.clone(),
            owner_id: job.owner_id.clone(),
            state: job.state.clone(),
            record: Some(record),
            error: None,
        }
    }

    pub fn failed(job: &AcquisitionJob, error: crate::pipeline::AcquireError) -> Self {
        Self {
            job_id: job.job_id.clone(),
            owner_id: job.owner_id.clone(),
            state: job.state.clone(),
            record: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed && self.record.is_some()
    }

    /// Converts into a `Result`, the shape the blocking façade returns.
    pub fn into_result(self) -> Result<CatalogRecord, crate::pipeline::AcquireError> {
        match (self.record, self.error) {
            (Some(record), None) => Ok(record),
            (_, Some(error)) => Err(error),
            (None, None) => Err(crate::pipeline::AcquireError::PipelineAborted(
                "job finished without a catalog record".to_string(),
            )),
        }
    }
}
