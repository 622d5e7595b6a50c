//! Blocking façade over the pipeline for callers without an async context.
//!
//! Each call runs one job on a dedicated thread and waits on a bounded
//! channel. The channel receives exactly one outcome. A timed-out caller
//! gets [`AcquireError::TimedOut`] while the job keeps running; its eventual
//! outcome is only logged.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendError};
use tracing::{info, warn};

use crate::registrar::CatalogRecord;
use crate::worker::job::{AcquisitionJob, JobOutcome, SourceDescriptor};

use super::error::AcquireError;
use super::progress::{NoopProgress, ProgressReporter};
use super::runner::JobRunner;

pub struct SynchronousOrchestrator {
    runner: Arc<dyn JobRunner>,
    progress: Arc<dyn ProgressReporter>,
    timeout: Duration,
}

impl SynchronousOrchestrator {
    pub fn new(runner: Arc<dyn JobRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            progress: Arc::new(NoopProgress),
            timeout,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Imports, extracts and registers a local archive. The job id doubles
    /// as the catalog id.
    pub fn run_blocking(&self, path: &Path, job_id: &str) -> Result<CatalogRecord, AcquireError> {
        self.run_blocking_for(job_id, SourceDescriptor::Local(path.to_path_buf()), job_id)
    }

    /// Downloads, extracts and registers a remote archive.
    pub fn run_blocking_remote(&self, url: &str, job_id: &str) -> Result<CatalogRecord, AcquireError> {
        self.run_blocking_for(job_id, SourceDescriptor::Remote(url.to_string()), job_id)
    }

    pub fn run_blocking_for(
        &self,
        owner_id: &str,
        source: SourceDescriptor,
        job_id: &str,
    ) -> Result<CatalogRecord, AcquireError> {
        let job = AcquisitionJob::with_id(job_id, owner_id, source);
        self.run_job(job)
    }

    fn run_job(&self, job: AcquisitionJob) -> Result<CatalogRecord, AcquireError> {
        let (tx, rx) = crossbeam_channel::bounded::<JobOutcome>(1);
        let runner = Arc::clone(&self.runner);
        let progress = Arc::clone(&self.progress);
        let job_id = job.job_id.clone();

        std::thread::Builder::new()
            .name(format!("acquire-{}", short_id(&job_id)))
            .spawn(move || {
                let outcome = runner.run_job(job, progress.as_ref());
                if let Err(SendError(outcome)) = tx.send(outcome) {
                    match outcome.into_result() {
                        Ok(record) => info!(
                            "Job {} finished after its caller gave up; registered {}",
                            record.job_id, record.bundle_identifier
                        ),
                        Err(e) => warn!("Job finished after its caller gave up: {}", e),
                    }
                }
            })
            .map_err(|e| AcquireError::PipelineAborted(format!("could not start worker: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome.into_result(),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Job {} did not finish within {}s",
                    job_id,
                    self.timeout.as_secs()
                );
                Err(AcquireError::TimedOut(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AcquireError::PipelineAborted(
                "worker exited without a result".to_string(),
            )),
        }
    }
}

fn short_id(job_id: &str) -> &str {
    job_id.get(..8).unwrap_or(job_id)
}
