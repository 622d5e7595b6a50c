pub mod broadcast;
pub mod config;
pub mod error;
pub mod extractor;
pub mod importer;
pub mod logging;
pub mod pipeline;
pub mod registrar;
pub mod sanitize;
pub mod storage;
pub mod transport;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, BundleLayout, Config};
pub use error::{ConfigError, Result, SidestageError, StorageError, WorkerError};
pub use extractor::Extractor;
pub use importer::Importer;
pub use pipeline::{AcquireError, Pipeline, PipelineConfig, PipelineContext, SynchronousOrchestrator};
pub use registrar::{Catalog, CatalogError, CatalogRecord, JsonCatalog, MemoryCatalog, Registrar};
pub use storage::WorkspaceAllocator;
pub use transport::{TransferHandle, TransferRequest, Transport};
pub use worker::{AcquisitionJob, HotFolderWatcher, JobOutcome, JobState, ScanReport};
