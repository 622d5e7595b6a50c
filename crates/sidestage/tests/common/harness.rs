//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct provides:
//! - Temporary inbox, staging, hot folder and scratch directories
//! - An in-memory catalog shared with the pipeline
//! - Optional HTTP transport bound to the caller's tokio runtime

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;

use sidestage::config::{BundleLayout, TransferConfig};
use sidestage::pipeline::{NoopProgress, PipelineContext};
use sidestage::{
    AcquisitionJob, HotFolderWatcher, JobOutcome, MemoryCatalog, Pipeline, PipelineConfig,
    SynchronousOrchestrator, Transport,
};

use super::builders::ArchiveBuilder;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Where local archives are placed before import.
    pub inbox: PathBuf,
    /// Staging root; one workspace per job.
    pub staging: PathBuf,
    /// Watched hot folder.
    pub hot: PathBuf,
    /// Temporary copies made by the hot folder watcher.
    pub scratch: PathBuf,
    pub catalog: Arc<MemoryCatalog>,
    pub pipeline: Arc<Pipeline>,
}

impl TestHarness {
    /// Harness for local jobs only.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Harness whose pipeline can also download, with https not enforced.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self::build(Some(runtime))
    }

    fn build(runtime: Option<Handle>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let inbox = base.join("inbox");
        let staging = base.join("Apps").join("Unsigned");
        let hot = base.join("ImportedIPAs");
        let scratch = base.join("scratch");
        std::fs::create_dir_all(&inbox).expect("Failed to create inbox");

        let transfer = TransferConfig {
            require_https: false,
            ..TransferConfig::default()
        };
        let config = Arc::new(PipelineConfig {
            staging_root: staging.clone(),
            layout: BundleLayout::default(),
            transfer: transfer.clone(),
            blocking_timeout: Duration::from_secs(30),
        });

        let catalog = Arc::new(MemoryCatalog::new());
        let mut pipeline = Pipeline::from_config(config, catalog.clone());
        if let Some(runtime) = runtime {
            let transport = Transport::new(&transfer, runtime).expect("Failed to build transport");
            pipeline = pipeline.with_transport(Arc::new(transport));
        }

        Self {
            temp_dir,
            inbox,
            staging,
            hot,
            scratch,
            catalog,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an archive into the inbox and returns its path.
    pub fn drop_archive(&self, name: &str, archive: &ArchiveBuilder) -> PathBuf {
        let path = self.inbox.join(name);
        archive.write_to(&path);
        path
    }

    pub fn run_local(&self, path: &Path) -> (JobOutcome, PipelineContext) {
        let job = AcquisitionJob::local("owner", path);
        self.pipeline
            .run(PipelineContext::new(job), &NoopProgress)
    }

    pub fn workspace(&self, job_id: &str) -> PathBuf {
        self.staging.join(job_id)
    }

    /// Sorted names directly under `dir`; empty if `dir` is missing.
    pub fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub fn orchestrator(&self, timeout: Duration) -> SynchronousOrchestrator {
        SynchronousOrchestrator::new(self.pipeline.clone(), timeout)
    }

    pub fn hot_folder_watcher(&self) -> HotFolderWatcher {
        HotFolderWatcher::new(
            &self.hot,
            BundleLayout::default(),
            Arc::new(self.orchestrator(Duration::from_secs(30))),
        )
        .with_temp_root(&self.scratch)
        .with_timing(Duration::from_millis(100), Duration::from_millis(50))
    }
}
