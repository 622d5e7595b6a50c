//! The catalog collaborator and the two implementations shipped with the crate.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to access catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Catalog rejected entry: {0}")]
    Rejected(String),
}

/// Everything the registrar knows about a freshly prepared bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub display_name: String,
    pub short_version: String,
    pub bundle_identifier: String,
    /// Icon file name inside the bundle, empty when none was found.
    pub icon: String,
    pub job_id: String,
    pub owner_id: String,
    pub bundle_path: PathBuf,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    pub display_name: String,
    pub short_version: String,
    pub bundle_identifier: String,
    #[serde(default)]
    pub icon: String,
    pub job_id: String,
    pub bundle_path: PathBuf,
    pub source: String,
    pub added_at: DateTime<Utc>,
}

impl CatalogRecord {
    fn from_entry(entry: NewCatalogEntry) -> Self {
        Self {
            id: entry.owner_id,
            display_name: entry.display_name,
            short_version: entry.short_version,
            bundle_identifier: entry.bundle_identifier,
            icon: entry.icon,
            job_id: entry.job_id,
            bundle_path: entry.bundle_path,
            source: entry.source,
            added_at: Utc::now(),
        }
    }
}

/// Sink for registered bundles. Implementations synchronize internally.
pub trait Catalog: Send + Sync {
    fn add_entry(&self, entry: NewCatalogEntry) -> Result<CatalogRecord, CatalogError>;
}

/// In-process catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: Mutex<Vec<CatalogRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CatalogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for MemoryCatalog {
    fn add_entry(&self, entry: NewCatalogEntry) -> Result<CatalogRecord, CatalogError> {
        let record = CatalogRecord::from_entry(entry);
        let mut records = self
            .records
            .lock()
            .map_err(|_| CatalogError::Rejected("catalog lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(record)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    apps: Vec<CatalogRecord>,
}

/// Catalog persisted as a JSON manifest file.
///
/// The whole manifest is rewritten on every addition, through a temporary
/// file renamed into place.
#[derive(Debug)]
pub struct JsonCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCatalog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record currently in the manifest, oldest first.
    pub fn records(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CatalogError::Rejected("catalog lock poisoned".to_string()))?;
        Ok(self.load()?.apps)
    }

    fn load(&self) -> Result<Manifest, CatalogError> {
        if !self.path.exists() {
            return Ok(Manifest::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| CatalogError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, manifest: &Manifest) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CatalogError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| CatalogError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| CatalogError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl Catalog for JsonCatalog {
    fn add_entry(&self, entry: NewCatalogEntry) -> Result<CatalogRecord, CatalogError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CatalogError::Rejected("catalog lock poisoned".to_string()))?;

        let mut manifest = self.load()?;
        if manifest.apps.iter().any(|r| r.id == entry.owner_id) {
            return Err(CatalogError::Rejected(format!(
                "an entry with id '{}' already exists",
                entry.owner_id
            )));
        }

        let record = CatalogRecord::from_entry(entry);
        manifest.apps.push(record.clone());
        self.save(&manifest)?;
        Ok(record)
    }
}
