use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::pipeline::AcquireError;

/// Invoked once with the outcome of a transfer.
pub type CompletionFn = Box<dyn FnOnce(Result<PathBuf, AcquireError>) + Send>;

/// Opaque identifier of one in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle(pub(crate) u64);

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

pub(crate) struct TransferEntry {
    pub job_id: String,
    pub owner_id: String,
    pub destination: PathBuf,
    pub cancel: CancellationToken,
    pub on_complete: CompletionFn,
}

impl TransferEntry {
    pub fn finish(self, result: Result<PathBuf, AcquireError>) {
        (self.on_complete)(result)
    }
}

/// Maps transfer handles to the job they belong to.
///
/// An entry leaves the map exactly once, through whichever of completion,
/// failure or cancellation takes it first. Only the taker runs the
/// completion callback.
#[derive(Default)]
pub(crate) struct TransferRegistry {
    entries: Mutex<HashMap<TransferHandle, TransferEntry>>,
}

impl TransferRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<TransferHandle, TransferEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: TransferHandle, entry: TransferEntry) {
        self.lock().insert(handle, entry);
    }

    pub fn take(&self, handle: TransferHandle) -> Option<TransferEntry> {
        self.lock().remove(&handle)
    }

    pub fn drain(&self) -> Vec<(TransferHandle, TransferEntry)> {
        self.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn job_of(&self, handle: TransferHandle) -> Option<(String, String)> {
        self.lock()
            .get(&handle)
            .map(|e| (e.job_id.clone(), e.owner_id.clone()))
    }
}
