//! Moves locally supplied archives into a job workspace.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;
use crate::pipeline::AcquireError;
use crate::sanitize;
use crate::storage::filesystem;

#[derive(Debug, Clone, Default)]
pub struct Importer;

impl Importer {
    pub fn new() -> Self {
        Self
    }

    /// Moves `source` into `workspace`, keeping its file name.
    ///
    /// Either the archive ends up in the workspace and the source is gone, or
    /// nothing changes.
    pub fn import_local(&self, source: &Path, workspace: &Path) -> Result<PathBuf, AcquireError> {
        let metadata = std::fs::metadata(source).map_err(|_| {
            AcquireError::ImportFailed(format!(
                "source '{}' does not exist",
                sanitize::redact_path(source)
            ))
        })?;
        if !metadata.is_file() {
            return Err(AcquireError::ImportFailed(format!(
                "source '{}' is not a regular file",
                sanitize::redact_path(source)
            )));
        }

        let file_name = source.file_name().ok_or_else(|| {
            AcquireError::ImportFailed("source path has no file name".to_string())
        })?;

        filesystem::ensure_directory(workspace).map_err(|e| {
            AcquireError::ImportFailed(format!("workspace could not be prepared: {}", e))
        })?;

        let destination = workspace.join(file_name);
        filesystem::move_file(source, &destination).map_err(|e| match e {
            StorageError::AlreadyExists(_) => AcquireError::ImportFailed(format!(
                "'{}' already exists in the workspace",
                sanitize::redact_path(&destination)
            )),
            other => AcquireError::ImportFailed(other.to_string()),
        })?;

        debug!(
            "Imported {} into workspace",
            sanitize::redact_path(&destination)
        );
        Ok(destination)
    }
}
