use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::StorageError;
use crate::registrar::CatalogError;
use crate::worker::job::JobStateError;

/// Every way an acquisition can end other than success.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Failed to allocate workspace: {0}")]
    Allocation(#[source] StorageError),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Archive not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Archive has no '{wrapper}' directory")]
    MissingWrapperDirectory { wrapper: String },

    #[error("No '.{extension}' bundle found in '{wrapper}'")]
    BundleNotFound { wrapper: String, extension: String },

    #[error("Archive contains more than one bundle: {}", candidates.join(", "))]
    AmbiguousBundle { candidates: Vec<String> },

    #[error("Bundle metadata at '{path}' is unreadable: {reason}")]
    MetadataUnreadable { path: PathBuf, reason: String },

    #[error("Registration failed: missing {0}")]
    RegistrationFailed(String),

    #[error("Catalog rejected entry: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Operation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("{0}")]
    InvalidState(#[from] JobStateError),

    #[error("Pipeline aborted: {0}")]
    PipelineAborted(String),
}

impl AcquireError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AcquireError::Cancelled)
    }

    /// Text suitable for showing to a user. Cancellation is reported as a
    /// neutral state rather than an error.
    pub fn user_message(&self) -> String {
        match self {
            AcquireError::Cancelled => "Cancelled".to_string(),
            AcquireError::Allocation(_) => "Could not prepare a staging directory".to_string(),
            AcquireError::TransferFailed(reason) => format!("Download failed: {}", reason),
            AcquireError::ImportFailed(reason) => format!("Import failed: {}", reason),
            AcquireError::SourceMissing(_) => "The archive no longer exists".to_string(),
            AcquireError::ExtractionFailed(_) => "The archive could not be unpacked".to_string(),
            AcquireError::MissingWrapperDirectory { .. }
            | AcquireError::BundleNotFound { .. }
            | AcquireError::AmbiguousBundle { .. } => {
                "The archive does not contain a valid application".to_string()
            }
            AcquireError::MetadataUnreadable { .. } | AcquireError::RegistrationFailed(_) => {
                "The application's metadata is invalid".to_string()
            }
            AcquireError::Catalog(_) => "The application could not be added to the library".to_string(),
            AcquireError::TimedOut(_) => "The operation timed out, please retry".to_string(),
            AcquireError::InvalidState(_) | AcquireError::PipelineAborted(_) => {
                "The operation was interrupted".to_string()
            }
        }
    }
}
