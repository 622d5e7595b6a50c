use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;
use crate::sanitize;
use crate::storage::filesystem;

/// Issues job-exclusive directories under the unsigned staging root.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    staging_root: PathBuf,
}

impl WorkspaceAllocator {
    pub fn new<P: AsRef<Path>>(staging_root: P) -> Self {
        Self {
            staging_root: staging_root.as_ref().to_path_buf(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Creates a workspace named by a freshly generated identifier.
    pub fn allocate(&self) -> Result<PathBuf, StorageError> {
        self.allocate_for(&uuid::Uuid::new_v4().to_string())
    }

    /// Creates `<staging_root>/<id>`.
    ///
    /// An existing directory with the same name is an identifier collision
    /// and is reported as [`StorageError::AlreadyExists`]; it is never retried.
    pub fn allocate_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(StorageError::CreateDirectory {
                path: self.staging_root.join(id),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "workspace id must be a single path component",
                ),
            });
        }

        filesystem::ensure_directory(&self.staging_root)?;

        let path = self.staging_root.join(id);
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path));
            }
            Err(e) => {
                return Err(StorageError::CreateDirectory { path, source: e });
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).map_err(
                |e| StorageError::CreateDirectory {
                    path: path.clone(),
                    source: e,
                },
            )?;
        }

        debug!("Allocated workspace {}", sanitize::redact_path(&path));
        Ok(path)
    }

    /// Removes a workspace and everything in it. Safe to call repeatedly.
    pub fn release(&self, workspace: &Path) -> Result<(), StorageError> {
        filesystem::remove_path(workspace)?;
        debug!("Released workspace {}", sanitize::redact_path(workspace));
        Ok(())
    }
}
