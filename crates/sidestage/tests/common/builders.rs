//! Builders for creating test archives and configurations programmatically.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use plist::{Dictionary, Value};
use zip::write::SimpleFileOptions;

/// Builder for an application `Info.plist`.
#[derive(Clone)]
pub struct InfoPlistBuilder {
    dict: Dictionary,
    binary: bool,
}

impl InfoPlistBuilder {
    /// A complete property list for `com.example.<name lowercased>`.
    pub fn new(name: &str) -> Self {
        Self::empty()
            .string("CFBundleDisplayName", name)
            .string("CFBundleShortVersionString", "1.0")
            .string(
                "CFBundleIdentifier",
                &format!("com.example.{}", name.to_lowercase()),
            )
    }

    pub fn empty() -> Self {
        Self {
            dict: Dictionary::new(),
            binary: false,
        }
    }

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.dict
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.dict.remove(key);
        self
    }

    /// Declares `CFBundleIcons/CFBundlePrimaryIcon/CFBundleIconFiles = [base]`.
    pub fn primary_icon(mut self, base: &str) -> Self {
        let mut primary = Dictionary::new();
        primary.insert(
            "CFBundleIconFiles".to_string(),
            Value::Array(vec![Value::String(base.to_string())]),
        );
        let mut icons = Dictionary::new();
        icons.insert("CFBundlePrimaryIcon".to_string(), Value::Dictionary(primary));
        self.dict
            .insert("CFBundleIcons".to_string(), Value::Dictionary(icons));
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let value = Value::Dictionary(self.dict.clone());
        if self.binary {
            value.to_writer_binary(&mut buf).expect("serialize binary plist");
        } else {
            value.to_writer_xml(&mut buf).expect("serialize xml plist");
        }
        buf
    }
}

/// Builder for `.ipa`-style ZIP archives.
#[derive(Default)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A well-formed archive: `Payload/<name>.app` with metadata, an
    /// executable and a code signature.
    pub fn app(name: &str) -> Self {
        Self::new().bundle(name, InfoPlistBuilder::new(name))
    }

    pub fn bundle(self, name: &str, info: InfoPlistBuilder) -> Self {
        let root = format!("Payload/{}.app", name);
        self.file(&format!("{}/Info.plist", root), info.to_bytes())
            .file(&format!("{}/{}", root, name), b"\x7fELF-ish executable".to_vec())
            .file(
                &format!("{}/_CodeSignature/CodeResources", root),
                b"<plist/>".to_vec(),
            )
    }

    pub fn file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.entries.push((name.to_string(), data));
        self
    }

    pub fn write_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create archive parent");
        }
        let file = std::fs::File::create(path).expect("create archive");
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in &self.entries {
            if name.ends_with('/') {
                zip.add_directory(name.as_str(), SimpleFileOptions::default())
                    .expect("add directory");
            } else {
                zip.start_file(name.as_str(), SimpleFileOptions::default())
                    .expect("start file");
                zip.write_all(data).expect("write entry");
            }
        }
        zip.finish().expect("finish archive");
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        self.write_to(tmp.path());
        std::fs::read(tmp.path()).expect("read archive")
    }
}

/// Builder for JSON configuration documents.
pub struct ConfigBuilder {
    value: serde_json::Value,
}

impl ConfigBuilder {
    pub fn new(staging_root: &str) -> Self {
        Self {
            value: serde_json::json!({
                "version": "1.0",
                "staging_root": staging_root,
            }),
        }
    }

    pub fn set(mut self, key: &str, value: serde_json::Value) -> Self {
        self.value[key] = value;
        self
    }

    pub fn hot_folder(self, path: &str) -> Self {
        self.set("hot_folder", serde_json::json!({ "path": path }))
    }

    pub fn build(&self) -> String {
        serde_json::to_string_pretty(&self.value).expect("serialize config")
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).expect("write config");
    }
}
