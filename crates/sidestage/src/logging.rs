//! Process-wide logging setup.
//!
//! Library code logs through `tracing` (and the `log` facade in a few
//! places); binaries call [`init`] once at startup.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `default_level`.
pub fn init(default_level: &str, json: bool) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}
