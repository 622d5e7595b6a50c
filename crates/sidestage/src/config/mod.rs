pub mod loader;
pub mod schema;

pub use loader::{default_config, load_config, load_config_from_str};
pub use schema::{BundleLayout, Config, HotFolderConfig, TransferConfig};
