use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info, info_span, warn};

use crate::broadcast::job_progress::JobPhase;
use crate::extractor::Extractor;
use crate::importer::Importer;
use crate::registrar::{Catalog, CatalogRecord, Registrar};
use crate::sanitize;
use crate::storage::WorkspaceAllocator;
use crate::transport::{TransferRequest, Transport};
use crate::worker::job::{AcquisitionJob, JobOutcome, JobState, SourceDescriptor};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::AcquireError;
use super::progress::{ProgressEvent, ProgressReporter};

const TRANSFER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Anything that can drive a job to a terminal outcome.
pub trait JobRunner: Send + Sync {
    fn run_job(&self, job: AcquisitionJob, progress: &dyn ProgressReporter) -> JobOutcome;
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    allocator: WorkspaceAllocator,
    importer: Importer,
    extractor: Extractor,
    registrar: Registrar,
    transport: Option<Arc<Transport>>,
}

impl Pipeline {
    /// Builds all sub-components from config. Remote jobs additionally need
    /// [`with_transport`](Self::with_transport).
    pub fn from_config(config: Arc<PipelineConfig>, catalog: Arc<dyn Catalog>) -> Self {
        let allocator = WorkspaceAllocator::new(&config.staging_root);
        let extractor = Extractor::new(config.layout.clone());
        let registrar = Registrar::new(catalog, config.layout.clone());

        Self {
            config,
            allocator,
            importer: Importer::new(),
            extractor,
            registrar,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transport(&self) -> Option<&Arc<Transport>> {
        self.transport.as_ref()
    }

    /// Runs every step for one job. Blocks the calling thread, including
    /// while a remote transfer is in flight.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (JobOutcome, PipelineContext) {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.job_id,
            owner_id = %ctx.job.owner_id,
            source = ctx.job.source.label(),
        )
        .entered();

        let steps = panic::catch_unwind(AssertUnwindSafe(|| self.run_steps(&mut ctx, progress)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Pipeline step panicked: {}", message);
                Err(AcquireError::PipelineAborted(format!("step panicked: {}", message)))
            });

        match steps {
            Ok(record) => {
                progress.report(ProgressEvent::Completed {
                    bundle_path: record.bundle_path.display().to_string(),
                    bundle_identifier: record.bundle_identifier.clone(),
                });
                info!("Job completed");
                (JobOutcome::completed(&ctx.job, record), ctx)
            }
            Err(err) => {
                self.abort(&mut ctx, &err, progress);
                (JobOutcome::failed(&ctx.job, err), ctx)
            }
        }
    }

    /// Fetches `url` and prepares it as a catalog entry owned by `owner_id`.
    pub async fn acquire_remote(
        self: &Arc<Self>,
        owner_id: &str,
        url: &str,
        progress: Arc<dyn ProgressReporter>,
    ) -> JobOutcome {
        self.acquire(AcquisitionJob::remote(owner_id, url), progress)
            .await
    }

    /// Runs a prepared job to completion.
    ///
    /// The blocking steps run on tokio's blocking pool, so this is safe to
    /// await from any runtime thread. Cancel through the job's token.
    pub async fn acquire(
        self: &Arc<Self>,
        job: AcquisitionJob,
        progress: Arc<dyn ProgressReporter>,
    ) -> JobOutcome {
        let job_id = job.job_id.clone();
        let fallback_owner = job.owner_id.clone();
        let pipeline = Arc::clone(self);

        let handle = tokio::task::spawn_blocking(move || {
            let (outcome, _ctx) = pipeline.run(PipelineContext::new(job), progress.as_ref());
            outcome
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome {
                job_id,
                owner_id: fallback_owner,
                state: JobState::Failed(e.to_string()),
                record: None,
                error: Some(AcquireError::PipelineAborted(e.to_string())),
            },
        }
    }

    fn run_steps(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<CatalogRecord, AcquireError> {
        {
            let _step = info_span!("allocate").entered();
            self.step_allocate(ctx)?;
        }

        match ctx.job.source.clone() {
            SourceDescriptor::Remote(url) => {
                let _step = info_span!("transfer").entered();
                ctx.job.transition(JobState::Transferring)?;
                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Transferring,
                    message: "Downloading archive...".to_string(),
                });
                self.step_transfer(ctx, &url, progress)?;
            }
            SourceDescriptor::Local(path) => {
                let _step = info_span!("import").entered();
                ctx.job.transition(JobState::Importing)?;
                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Importing,
                    message: "Importing archive...".to_string(),
                });
                self.step_import(ctx, &path)?;
            }
        }

        {
            let _step = info_span!("extract").entered();
            ctx.job.transition(JobState::Extracting)?;
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Extracting,
                message: "Extracting application...".to_string(),
            });
            self.step_extract(ctx)?;
        }

        let record = {
            let _step = info_span!("register").entered();
            ctx.job.transition(JobState::Registering)?;
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Registering,
                message: "Adding to library...".to_string(),
            });
            self.step_register(ctx)?
        };

        ctx.job.transition(JobState::Completed)?;
        Ok(record)
    }

    fn step_allocate(&self, ctx: &mut PipelineContext) -> Result<(), AcquireError> {
        let workspace = self
            .allocator
            .allocate_for(&ctx.job.job_id)
            .map_err(AcquireError::Allocation)?;
        ctx.job.set_workspace(workspace);
        Ok(())
    }

    fn step_import(&self, ctx: &mut PipelineContext, source: &Path) -> Result<(), AcquireError> {
        ensure_not_cancelled(&ctx.job)?;
        let workspace = workspace_of(&ctx.job)?;
        let archive = self.importer.import_local(source, &workspace)?;
        ctx.archive_path = Some(archive);
        Ok(())
    }

    fn step_transfer(
        &self,
        ctx: &mut PipelineContext,
        url: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(), AcquireError> {
        ensure_not_cancelled(&ctx.job)?;
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| AcquireError::TransferFailed("no transport configured".to_string()))?;
        let workspace = workspace_of(&ctx.job)?;
        let destination =
            workspace.join(archive_file_name(url, &ctx.job.job_id, &self.config.layout.archive_extension));

        let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<f64>();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let handle = transport.download(
            TransferRequest {
                job_id: ctx.job.job_id.clone(),
                owner_id: ctx.job.owner_id.clone(),
                url: url.to_string(),
                destination,
                cancel: ctx.job.cancel_token().clone(),
            },
            Arc::new(move |fraction| {
                let _ = progress_tx.send(fraction);
            }),
            Box::new(move |result| {
                let _ = done_tx.send(result);
            }),
        );
        debug!(%handle, "Transfer started");

        let result = loop {
            for fraction in progress_rx.try_iter() {
                forward_progress(ctx, fraction, progress);
            }
            match done_rx.recv_timeout(TRANSFER_POLL_INTERVAL) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(AcquireError::PipelineAborted(
                        "transfer ended without reporting a result".to_string(),
                    ))
                }
            }
        };
        for fraction in progress_rx.try_iter() {
            forward_progress(ctx, fraction, progress);
        }

        match result {
            Ok(archive) => {
                ctx.archive_path = Some(archive);
                Ok(())
            }
            Err(e) => {
                if e.is_cancelled() {
                    ctx.job.cancel_token().cancel();
                }
                Err(e)
            }
        }
    }

    fn step_extract(&self, ctx: &mut PipelineContext) -> Result<(), AcquireError> {
        let archive = ctx.archive_path.as_ref().ok_or_else(|| {
            AcquireError::PipelineAborted("no archive staged before extraction".to_string())
        })?;
        let bundle = self.extractor.extract(archive, ctx.job.cancel_token())?;
        ctx.bundle_path = Some(bundle);
        Ok(())
    }

    fn step_register(&self, ctx: &mut PipelineContext) -> Result<CatalogRecord, AcquireError> {
        ensure_not_cancelled(&ctx.job)?;
        let bundle = ctx.bundle_path.as_ref().ok_or_else(|| {
            AcquireError::PipelineAborted("no bundle extracted before registration".to_string())
        })?;
        let record = self.registrar.register(
            bundle,
            &ctx.job.job_id,
            &ctx.job.owner_id,
            ctx.job.source.label(),
        )?;
        ctx.record = Some(record.clone());
        Ok(record)
    }

    /// Terminal failure: the workspace goes away with everything in it.
    fn abort(&self, ctx: &mut PipelineContext, err: &AcquireError, progress: &dyn ProgressReporter) {
        if let Some(workspace) = ctx.job.workspace() {
            if let Err(e) = self.allocator.release(workspace) {
                warn!(
                    "Could not release workspace {}: {}",
                    sanitize::redact_path(workspace),
                    e
                );
            }
        }
        ctx.archive_path = None;
        ctx.bundle_path = None;

        let next = if err.is_cancelled() {
            progress.report(ProgressEvent::Cancelled);
            info!("Job cancelled");
            JobState::Cancelled
        } else {
            progress.report(ProgressEvent::Failed {
                error: err.to_string(),
            });
            warn!("Job failed: {}", err);
            JobState::Failed(err.to_string())
        };
        if let Err(e) = ctx.job.transition(next) {
            debug!("Job already terminal: {}", e);
        }
    }
}

impl JobRunner for Pipeline {
    fn run_job(&self, job: AcquisitionJob, progress: &dyn ProgressReporter) -> JobOutcome {
        let (outcome, _ctx) = self.run(PipelineContext::new(job), progress);
        outcome
    }
}

fn ensure_not_cancelled(job: &AcquisitionJob) -> Result<(), AcquireError> {
    if job.is_cancelled() {
        return Err(AcquireError::Cancelled);
    }
    Ok(())
}

fn workspace_of(job: &AcquisitionJob) -> Result<PathBuf, AcquireError> {
    job.workspace()
        .map(Path::to_path_buf)
        .ok_or_else(|| AcquireError::PipelineAborted("job has no workspace".to_string()))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn forward_progress(ctx: &mut PipelineContext, fraction: f64, progress: &dyn ProgressReporter) {
    let before = ctx.job.progress();
    if let Some(stored) = ctx.job.record_progress(fraction) {
        if before != Some(stored) {
            progress.report(ProgressEvent::Transfer { fraction: stored });
        }
    }
}

/// File name for a downloaded archive: the URL's last path segment when it
/// carries the archive extension, otherwise `<job_id>.<extension>`.
fn archive_file_name(url: &str, job_id: &str, extension: &str) -> String {
    let from_url = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });

    match from_url {
        Some(name)
            if !name.starts_with('.')
                && Path::new(&name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case(extension))
                    .unwrap_or(false) =>
        {
            name
        }
        _ => format!("{}.{}", job_id, extension),
    }
}
