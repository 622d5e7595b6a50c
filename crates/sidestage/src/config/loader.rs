use std::path::{Path, PathBuf};

use crate::config::schema::{BundleLayout, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;
    expand_paths(&mut config);

    Ok(config)
}

/// Default configuration under the platform data directory, used when no
/// config file is supplied.
pub fn default_config() -> Result<Config, ConfigError> {
    let base = dirs::data_dir()
        .ok_or(ConfigError::NoDataDirectory)?
        .join("sidestage");
    Ok(Config::with_defaults(base))
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.blocking_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "blocking_timeout_secs must be greater than zero".to_string(),
        });
    }

    validate_layout(&config.layout)?;

    if let Some(hot_folder) = &config.hot_folder {
        if expand_tilde(&hot_folder.path) == expand_tilde(&config.staging_root) {
            return Err(ConfigError::Validation {
                message: "hot_folder.path must differ from staging_root".to_string(),
            });
        }
    }

    Ok(())
}

fn validate_layout(layout: &BundleLayout) -> Result<(), ConfigError> {
    let names = [
        ("wrapper_directory", &layout.wrapper_directory),
        ("bundle_extension", &layout.bundle_extension),
        ("code_signature_directory", &layout.code_signature_directory),
        ("archive_extension", &layout.archive_extension),
        ("metadata_file", &layout.metadata_file),
    ];

    for (field, value) in names {
        if value.is_empty() || value.contains('/') || value.contains('\\') || value == ".." {
            return Err(ConfigError::Validation {
                message: format!("layout.{} must be a single path component: '{}'", field, value),
            });
        }
    }

    for (field, value) in [
        ("bundle_extension", &layout.bundle_extension),
        ("archive_extension", &layout.archive_extension),
    ] {
        if value.starts_with('.') {
            return Err(ConfigError::Validation {
                message: format!("layout.{} must not start with '.': '{}'", field, value),
            });
        }
    }

    Ok(())
}

fn expand_paths(config: &mut Config) {
    config.staging_root = expand_tilde(&config.staging_root).display().to_string();
    if let Some(hot_folder) = config.hot_folder.as_mut() {
        hot_folder.path = expand_tilde(&hot_folder.path).display().to_string();
    }
    if let Some(catalog_path) = config.catalog_path.as_mut() {
        *catalog_path = expand_tilde(catalog_path).display().to_string();
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "staging_root": "/data/Apps/Unsigned"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.staging_root, "/data/Apps/Unsigned");
        assert!(config.hot_folder.is_none());
        assert_eq!(config.layout, BundleLayout::default());
        assert_eq!(config.blocking_timeout_secs, 300);
        assert!(config.transfer.require_https);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "staging_root": "/data/staging",
            "hot_folder": { "path": "/data/inbox", "poll_interval": 5 },
            "catalog_path": "/data/catalog.json",
            "layout": { "archive_extension": "zip" },
            "transfer": { "require_https": false },
            "blocking_timeout_secs": 60
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        let hot_folder = config.hot_folder.as_ref().unwrap();
        assert_eq!(hot_folder.path, "/data/inbox");
        assert_eq!(hot_folder.poll_interval, 5);
        assert_eq!(hot_folder.debounce_ms, 500);
        assert_eq!(config.layout.archive_extension, "zip");
        assert_eq!(config.layout.wrapper_directory, "Payload");
        assert!(!config.transfer.require_https);
        assert_eq!(config.blocking_timeout_secs, 60);
    }

    #[test]
    fn test_invalid_version() {
        let config_json = r#"{ "version": "2.0", "staging_root": "/data" }"#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_missing_staging_root_fails_schema() {
        let config_json = r#"{ "version": "1.0" }"#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let config_json = r#"{ "version": "1.0", "staging_root": "/data", "workers": 4 }"#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_layout_with_separator_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "staging_root": "/data",
            "layout": { "wrapper_directory": "Payload/inner" }
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_hot_folder_must_differ_from_staging_root() {
        let config_json = r#"
        {
            "version": "1.0",
            "staging_root": "/data/staging",
            "hot_folder": { "path": "/data/staging" }
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/sidestage.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
