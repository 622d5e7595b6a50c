pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::AcquireError;
pub use orchestrator::SynchronousOrchestrator;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{JobRunner, Pipeline};
