use std::path::PathBuf;
use std::time::Duration;

use crate::config::{BundleLayout, Config, TransferConfig};

pub struct PipelineConfig {
    pub staging_root: PathBuf,
    pub layout: BundleLayout,
    pub transfer: TransferConfig,
    pub blocking_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_root: PathBuf::from(&config.staging_root),
            layout: config.layout.clone(),
            transfer: config.transfer.clone(),
            blocking_timeout: config.blocking_timeout(),
        }
    }
}
