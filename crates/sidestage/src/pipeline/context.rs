use std::path::PathBuf;

use crate::registrar::CatalogRecord;
use crate::worker::job::AcquisitionJob;

pub struct PipelineContext {
    // Input
    pub job: AcquisitionJob,

    // Transfer/import result: the archive inside the workspace
    pub archive_path: Option<PathBuf>,

    // Extraction result: the normalized bundle
    pub bundle_path: Option<PathBuf>,

    // Registration result
    pub record: Option<CatalogRecord>,
}

impl PipelineContext {
    pub fn new(job: AcquisitionJob) -> Self {
        Self {
            job,
            archive_path: None,
            bundle_path: None,
            record: None,
        }
    }
}
