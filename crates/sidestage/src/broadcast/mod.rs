//! Broadcasting of job events for real-time streaming to any front end.

pub mod job_progress;

pub use job_progress::{
    JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker, JobStatus,
};
