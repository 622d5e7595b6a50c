use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig};
use walkdir::WalkDir;

use crate::config::{BundleLayout, HotFolderConfig};
use crate::error::WorkerError;
use crate::pipeline::{AcquireError, SynchronousOrchestrator};
use crate::registrar::CatalogRecord;
use crate::sanitize;
use crate::storage::filesystem;

/// Result of one pass over the hot folder.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub imported: Vec<(PathBuf, CatalogRecord)>,
    pub failed: Vec<(PathBuf, AcquireError)>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.imported.is_empty() && self.failed.is_empty()
    }
}

/// Imports archives dropped into a watched directory.
///
/// Every archive is copied aside and run through the blocking orchestrator.
/// The original is removed only once its job has completed.
pub struct HotFolderWatcher {
    folder: PathBuf,
    layout: BundleLayout,
    orchestrator: Arc<SynchronousOrchestrator>,
    temp_root: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    scan_lock: Mutex<()>,
}

impl HotFolderWatcher {
    pub fn new<P: AsRef<Path>>(
        folder: P,
        layout: BundleLayout,
        orchestrator: Arc<SynchronousOrchestrator>,
    ) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            layout,
            orchestrator,
            temp_root: std::env::temp_dir().join("sidestage-imports"),
            poll_interval: Duration::from_secs(2),
            debounce: Duration::from_millis(500),
            scan_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &HotFolderConfig,
        layout: BundleLayout,
        orchestrator: Arc<SynchronousOrchestrator>,
    ) -> Self {
        Self::new(&config.path, layout, orchestrator).with_timing(
            Duration::from_secs(config.poll_interval),
            Duration::from_millis(config.debounce_ms),
        )
    }

    pub fn with_timing(mut self, poll_interval: Duration, debounce: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.debounce = debounce;
        self
    }

    /// Directory that holds per-job copies while they are processed.
    pub fn with_temp_root<P: AsRef<Path>>(mut self, temp_root: P) -> Self {
        self.temp_root = temp_root.as_ref().to_path_buf();
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Lists archives at the top level of the folder, sorted by path.
    pub fn scan(&self) -> Result<Vec<PathBuf>, WorkerError> {
        std::fs::create_dir_all(&self.folder).map_err(|e| WorkerError::PrepareFolder {
            path: self.folder.clone(),
            source: e,
        })?;

        let mut archives = Vec::new();
        for entry in WalkDir::new(&self.folder).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WorkerError::ScanFailed {
                        path: self.folder.clone(),
                        source: e,
                    })
                }
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_file() && self.layout.is_archive_name(path) {
                debug!("Found archive: {}", sanitize::redact_path(path));
                archives.push(path.to_path_buf());
            }
        }
        archives.sort();

        Ok(archives)
    }

    /// Processes every archive currently in the folder, one after another.
    /// Concurrent callers queue behind each other.
    pub fn process_pending(&self) -> Result<ScanReport, WorkerError> {
        let _guard = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut report = ScanReport::default();
        for archive in self.scan()? {
            match self.process_one(&archive) {
                Ok(record) => {
                    if let Err(e) = filesystem::remove_path(&archive) {
                        warn!("Imported but could not remove original: {}", e);
                    }
                    report.imported.push((archive, record));
                }
                Err(e) => {
                    error!(
                        "Failed to import {}: {}",
                        sanitize::redact_path(&archive),
                        e
                    );
                    report.failed.push((archive, e));
                }
            }
        }

        if !report.is_empty() {
            info!(
                "Hot folder pass: {} imported, {} failed",
                report.imported.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    fn process_one(&self, archive: &Path) -> Result<CatalogRecord, AcquireError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let file_name = archive
            .file_name()
            .ok_or_else(|| AcquireError::ImportFailed("archive has no file name".to_string()))?;

        let staging = self.temp_root.join(&job_id);
        filesystem::ensure_directory(&staging)
            .map_err(|e| AcquireError::ImportFailed(e.to_string()))?;

        let copy = staging.join(file_name);
        let result = filesystem::copy_file(archive, &copy)
            .map_err(|e| AcquireError::ImportFailed(e.to_string()))
            .and_then(|_| self.orchestrator.run_blocking(&copy, &job_id));

        if let Err(e) = filesystem::remove_path(&staging) {
            warn!("Could not remove temporary copy: {}", e);
        }
        result
    }

    /// Processes the folder once, then again after every debounced change,
    /// until `shutdown` is set.
    pub fn watch(&self, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError> {
        self.process_pending()?;

        // Polling works on network and container mounts
        let poll_config = NotifyConfig::default().with_poll_interval(self.poll_interval);
        let debouncer_config = DebouncerConfig::default()
            .with_timeout(self.debounce)
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&self.folder, RecursiveMode::NonRecursive)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        info!("Watching {}", sanitize::redact_path(&self.folder));

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Hot folder watcher shutting down");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    let relevant = events
                        .iter()
                        .any(|event| self.layout.is_archive_name(&event.path));
                    if relevant {
                        if let Err(e) = self.process_pending() {
                            error!("Hot folder pass failed: {}", e);
                        }
                    }
                }
                Ok(Err(err)) => warn!("Watch error: {:?}", err),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watch channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }
}
