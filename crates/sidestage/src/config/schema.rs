use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root under which every job's workspace is allocated ("unsigned staging").
    pub staging_root: String,
    #[serde(default)]
    pub hot_folder: Option<HotFolderConfig>,
    /// JSON manifest used by the file-backed catalog.
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub layout: BundleLayout,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default = "default_blocking_timeout")]
    pub blocking_timeout_secs: u64,
}

fn default_blocking_timeout() -> u64 {
    300
}

impl Config {
    /// Builds a configuration rooted at `base` with every optional section defaulted.
    pub fn with_defaults(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            version: "1.0".to_string(),
            staging_root: base.join("Apps").join("Unsigned").display().to_string(),
            hot_folder: Some(HotFolderConfig {
                path: base.join("ImportedIPAs").display().to_string(),
                poll_interval: default_poll_interval(),
                debounce_ms: default_debounce_ms(),
            }),
            catalog_path: Some(base.join("catalog.json").display().to_string()),
            layout: BundleLayout::default(),
            transfer: TransferConfig::default(),
            blocking_timeout_secs: default_blocking_timeout(),
        }
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotFolderConfig {
    pub path: String,
    /// Seconds between polls of the watched directory.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_debounce_ms() -> u64 {
    500
}

/// Names that describe how an application archive is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLayout {
    #[serde(default = "default_wrapper_directory")]
    pub wrapper_directory: String,
    #[serde(default = "default_bundle_extension")]
    pub bundle_extension: String,
    #[serde(default = "default_code_signature_directory")]
    pub code_signature_directory: String,
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
}

fn default_wrapper_directory() -> String {
    "Payload".to_string()
}

fn default_bundle_extension() -> String {
    "app".to_string()
}

fn default_code_signature_directory() -> String {
    "_CodeSignature".to_string()
}

fn default_archive_extension() -> String {
    "ipa".to_string()
}

fn default_metadata_file() -> String {
    "Info.plist".to_string()
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self {
            wrapper_directory: default_wrapper_directory(),
            bundle_extension: default_bundle_extension(),
            code_signature_directory: default_code_signature_directory(),
            archive_extension: default_archive_extension(),
            metadata_file: default_metadata_file(),
        }
    }
}

impl BundleLayout {
    /// Case-insensitive check against the archive extension.
    pub fn is_archive_name(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.archive_extension))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Reject plain-http archive URLs.
    #[serde(default = "default_true")]
    pub require_https: bool,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("sidestage/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
            require_https: true,
        }
    }
}
