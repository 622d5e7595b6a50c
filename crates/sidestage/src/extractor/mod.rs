//! Unpacks a staged archive and normalizes it into a bare application bundle.
//!
//! After a successful [`Extractor::extract`] the workspace contains exactly
//! one `<Name>.<bundle_extension>` directory. The archive, the wrapper
//! directory and the code signature directory are gone.

mod unpack;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::BundleLayout;
use crate::pipeline::AcquireError;
use crate::sanitize;
use crate::storage::filesystem;

use unpack::{UnpackError, UnpackProgress};

#[derive(Debug, Clone)]
pub struct Extractor {
    layout: BundleLayout,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(BundleLayout::default())
    }
}

impl Extractor {
    pub fn new(layout: BundleLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    pub fn extract(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, AcquireError> {
        self.extract_with_progress(archive, cancel, &|_| {})
    }

    /// Same as [`extract`](Self::extract) but reports unpacked byte fractions
    /// to `on_progress`.
    pub fn extract_with_progress(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
        on_progress: &dyn Fn(f64),
    ) -> Result<PathBuf, AcquireError> {
        let span = info_span!("extract", archive = %sanitize::redact_path(archive));
        let _enter = span.enter();

        if !archive.is_file() {
            return Err(AcquireError::SourceMissing(archive.to_path_buf()));
        }
        let destination = archive
            .parent()
            .ok_or_else(|| AcquireError::ExtractionFailed("archive has no parent".to_string()))?
            .to_path_buf();

        if cancel.is_cancelled() {
            self.discard(&destination, &[], archive);
            return Err(AcquireError::Cancelled);
        }

        let mut zip = unpack::open(archive).map_err(|e| self.unpack_failure(e))?;
        let survey = unpack::survey(&mut zip).map_err(|e| self.unpack_failure(e))?;

        // Only remove what this run creates.
        let created: Vec<OsString> = survey
            .roots
            .iter()
            .filter(|root| !destination.join(root).exists())
            .cloned()
            .collect();

        let mut progress = UnpackProgress::new(cancel, on_progress);
        match unpack::unpack(&mut zip, &destination, survey.total_bytes, &mut progress) {
            Ok(()) => {}
            Err(UnpackError::Cancelled) => {
                info!("Extraction cancelled");
                self.discard(&destination, &created, archive);
                return Err(AcquireError::Cancelled);
            }
            Err(UnpackError::Failed(reason)) => {
                warn!("Unpacking failed: {}", reason);
                self.discard_outputs(&destination, &created);
                return Err(AcquireError::ExtractionFailed(reason));
            }
        }
        drop(zip);

        if cancel.is_cancelled() {
            self.discard(&destination, &created, archive);
            return Err(AcquireError::Cancelled);
        }

        if let Err(e) = filesystem::remove_path(archive) {
            warn!("Could not remove archive after unpacking: {}", e);
        }

        let bundle = self.normalize(&destination)?;
        info!(
            "Extracted bundle {}",
            sanitize::redact_path(&bundle)
        );
        Ok(bundle)
    }

    /// Hoists the single bundle out of the wrapper directory and strips its
    /// code signature.
    fn normalize(&self, destination: &Path) -> Result<PathBuf, AcquireError> {
        let wrapper = destination.join(&self.layout.wrapper_directory);
        if !wrapper.is_dir() {
            return Err(AcquireError::MissingWrapperDirectory {
                wrapper: self.layout.wrapper_directory.clone(),
            });
        }

        let bundle = self.locate_bundle(&wrapper)?;
        let bundle_name = bundle
            .file_name()
            .ok_or_else(|| AcquireError::ExtractionFailed("bundle has no name".to_string()))?;
        let target = destination.join(bundle_name);

        if target.symlink_metadata().is_ok() {
            debug!("Replacing existing {}", sanitize::redact_path(&target));
            filesystem::remove_path(&target)
                .map_err(|e| AcquireError::ExtractionFailed(e.to_string()))?;
        }

        std::fs::rename(&bundle, &target).map_err(|e| {
            AcquireError::ExtractionFailed(format!("could not move bundle out of wrapper: {}", e))
        })?;

        filesystem::remove_path(&wrapper).map_err(|e| {
            AcquireError::ExtractionFailed(format!("could not remove wrapper directory: {}", e))
        })?;

        let signature = target.join(&self.layout.code_signature_directory);
        if signature.exists() {
            if let Err(e) = filesystem::remove_path(&signature) {
                warn!("Could not remove code signature: {}", e);
            }
        }

        Ok(target)
    }

    fn locate_bundle(&self, wrapper: &Path) -> Result<PathBuf, AcquireError> {
        let entries = std::fs::read_dir(wrapper)
            .map_err(|e| AcquireError::ExtractionFailed(format!("cannot list wrapper: {}", e)))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && self.has_bundle_extension(path))
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => Err(AcquireError::BundleNotFound {
                wrapper: self.layout.wrapper_directory.clone(),
                extension: self.layout.bundle_extension.clone(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(AcquireError::AmbiguousBundle {
                candidates: candidates
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            }),
        }
    }

    fn has_bundle_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == self.layout.bundle_extension.as_str())
            .unwrap_or(false)
    }

    fn unpack_failure(&self, err: UnpackError) -> AcquireError {
        match err {
            UnpackError::Cancelled => AcquireError::Cancelled,
            UnpackError::Failed(reason) => AcquireError::ExtractionFailed(reason),
        }
    }

    fn discard(&self, destination: &Path, created: &[OsString], archive: &Path) {
        self.discard_outputs(destination, created);
        if let Err(e) = filesystem::remove_path(archive) {
            warn!("Could not remove archive: {}", e);
        }
    }

    fn discard_outputs(&self, destination: &Path, created: &[OsString]) {
        for root in created {
            if let Err(e) = filesystem::remove_path(&destination.join(root)) {
                warn!("Could not remove partial output: {}", e);
            }
        }
    }
}
