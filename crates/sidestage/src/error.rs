use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidestageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Acquisition error: {0}")]
    Acquire(#[from] crate::pipeline::AcquireError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::registrar::CatalogError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Could not determine a data directory for the staging root")]
    NoDataDirectory,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemovePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Path does not exist: {0}")]
    NotFound(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to prepare hot folder '{path}': {source}")]
    PrepareFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, SidestageError>;
