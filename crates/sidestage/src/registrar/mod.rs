//! Turns a prepared bundle into a catalog record.

pub mod catalog;
mod metadata;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span};

use crate::config::BundleLayout;
use crate::pipeline::AcquireError;
use crate::sanitize;

pub use catalog::{Catalog, CatalogError, CatalogRecord, JsonCatalog, MemoryCatalog, NewCatalogEntry};
pub use metadata::BundleMetadata;

#[derive(Clone)]
pub struct Registrar {
    catalog: Arc<dyn Catalog>,
    layout: BundleLayout,
}

impl Registrar {
    pub fn new(catalog: Arc<dyn Catalog>, layout: BundleLayout) -> Self {
        Self { catalog, layout }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Reads the bundle's metadata and adds it to the catalog exactly once.
    pub fn register(
        &self,
        bundle: &Path,
        job_id: &str,
        owner_id: &str,
        source_label: &str,
    ) -> Result<CatalogRecord, AcquireError> {
        let span = info_span!("register", bundle = %sanitize::redact_path(bundle), job_id = %job_id);
        let _enter = span.enter();

        let metadata = BundleMetadata::read(bundle, &self.layout.metadata_file)?;
        let icon = metadata.resolve_icon(bundle).unwrap_or_default();

        let entry = NewCatalogEntry {
            display_name: metadata.display_name,
            short_version: metadata.short_version,
            bundle_identifier: metadata.bundle_identifier,
            icon,
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
            bundle_path: bundle.to_path_buf(),
            source: source_label.to_string(),
        };

        let record = self.catalog.add_entry(entry)?;
        info!(
            "Registered {} {} ({})",
            record.display_name, record.short_version, record.bundle_identifier
        );
        Ok(record)
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
