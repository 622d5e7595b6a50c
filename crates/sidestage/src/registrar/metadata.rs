use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};

use crate::pipeline::AcquireError;

const DISPLAY_NAME: &str = "CFBundleDisplayName";
const BUNDLE_NAME: &str = "CFBundleName";
const SHORT_VERSION: &str = "CFBundleShortVersionString";
const IDENTIFIER: &str = "CFBundleIdentifier";
const ICONS: &str = "CFBundleIcons";
const PRIMARY_ICON: &str = "CFBundlePrimaryIcon";
const ICON_FILES: &str = "CFBundleIconFiles";
const ICON_SUFFIX: &str = "@2x.png";

/// Fields read from a bundle's property list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMetadata {
    pub display_name: String,
    pub short_version: String,
    pub bundle_identifier: String,
    /// First primary icon file base name, if declared.
    pub icon_base: Option<String>,
}

impl BundleMetadata {
    /// Reads `metadata_file` inside `bundle`. Handles XML and binary lists.
    pub fn read(bundle: &Path, metadata_file: &str) -> Result<Self, AcquireError> {
        let path = bundle.join(metadata_file);
        let value = Value::from_file(&path).map_err(|e| AcquireError::MetadataUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let dict = value
            .as_dictionary()
            .ok_or_else(|| AcquireError::MetadataUnreadable {
                path: path.clone(),
                reason: "top-level value is not a dictionary".to_string(),
            })?;

        Self::from_dictionary(dict)
    }

    fn from_dictionary(dict: &Dictionary) -> Result<Self, AcquireError> {
        let display_name = string_field(dict, DISPLAY_NAME)
            .or_else(|| string_field(dict, BUNDLE_NAME))
            .ok_or_else(|| AcquireError::RegistrationFailed(DISPLAY_NAME.to_string()))?;
        let short_version = string_field(dict, SHORT_VERSION)
            .ok_or_else(|| AcquireError::RegistrationFailed(SHORT_VERSION.to_string()))?;
        let bundle_identifier = string_field(dict, IDENTIFIER)
            .ok_or_else(|| AcquireError::RegistrationFailed(IDENTIFIER.to_string()))?;

        let icon_base = dict
            .get(ICONS)
            .and_then(Value::as_dictionary)
            .and_then(|icons| icons.get(PRIMARY_ICON))
            .and_then(Value::as_dictionary)
            .and_then(|primary| primary.get(ICON_FILES))
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(Value::as_string)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            display_name,
            short_version,
            bundle_identifier,
            icon_base,
        })
    }

    /// The icon file name when `<base>@2x.png` exists in the bundle.
    pub fn resolve_icon(&self, bundle: &Path) -> Option<String> {
        let base = self.icon_base.as_deref()?;
        let file_name = format!("{}{}", base, ICON_SUFFIX);
        let candidate: PathBuf = bundle.join(&file_name);
        candidate.is_file().then_some(file_name)
    }
}

fn string_field(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key)
        .and_then(Value::as_string)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
