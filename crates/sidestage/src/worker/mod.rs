pub mod hot_folder;
pub mod job;

pub use hot_folder::{HotFolderWatcher, ScanReport};
pub use job::{AcquisitionJob, JobOutcome, JobState, JobStateError, SourceDescriptor};
