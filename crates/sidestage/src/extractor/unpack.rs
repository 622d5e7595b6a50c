//! Streaming ZIP unpacking with progress and cooperative cancellation.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path};

use tokio_util::sync::CancellationToken;
use zip::result::ZipError;
use zip::ZipArchive;

const COPY_BUFFER_SIZE: usize = 64 * 1024;
/// Link targets are short relative paths inside a bundle.
const MAX_LINK_TARGET: u64 = 4096;

#[derive(Debug)]
pub(crate) enum UnpackError {
    Cancelled,
    Failed(String),
}

impl From<std::io::Error> for UnpackError {
    fn from(err: std::io::Error) -> Self {
        UnpackError::Failed(err.to_string())
    }
}

impl From<ZipError> for UnpackError {
    fn from(err: ZipError) -> Self {
        UnpackError::Failed(err.to_string())
    }
}

/// What an archive will create, learned from its central directory before
/// any byte is written.
#[derive(Debug, Default)]
pub(crate) struct Survey {
    /// First path component of every entry.
    pub roots: BTreeSet<OsString>,
    /// Sum of uncompressed entry sizes.
    pub total_bytes: u64,
}

impl Survey {
    fn record(&mut self, root: Option<OsString>, size: u64) {
        if let Some(root) = root {
            self.roots.insert(root);
        }
        self.total_bytes = self.total_bytes.saturating_add(size);
    }
}

/// Tracks bytes written and carries the cancellation signal into the copy loop.
pub(crate) struct UnpackProgress<'a> {
    cancel: &'a CancellationToken,
    on_progress: &'a dyn Fn(f64),
    total_bytes: u64,
    written: u64,
}

impl<'a> UnpackProgress<'a> {
    pub fn new(cancel: &'a CancellationToken, on_progress: &'a dyn Fn(f64)) -> Self {
        Self {
            cancel,
            on_progress,
            total_bytes: 0,
            written: 0,
        }
    }

    fn check(&self) -> Result<(), UnpackError> {
        if self.cancel.is_cancelled() {
            return Err(UnpackError::Cancelled);
        }
        Ok(())
    }

    fn advance(&mut self, bytes: usize) {
        self.written = self.written.saturating_add(bytes as u64);
        if self.total_bytes > 0 {
            let fraction = (self.written as f64 / self.total_bytes as f64).min(1.0);
            (self.on_progress)(fraction);
        }
    }
}

pub(crate) fn open(archive_path: &Path) -> Result<ZipArchive<File>, UnpackError> {
    let file = File::open(archive_path)?;
    Ok(ZipArchive::new(file)?)
}

pub(crate) fn survey(archive: &mut ZipArchive<File>) -> Result<Survey, UnpackError> {
    let mut survey = Survey::default();

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| UnpackError::Failed(format!("unsafe entry path '{}'", entry.name())))?;

        let root = match relative.components().next() {
            Some(Component::Normal(root)) => Some(root.to_os_string()),
            _ => None,
        };
        survey.record(root, entry.size());
    }

    Ok(survey)
}

/// Writes every entry below `destination`, checking for cancellation before
/// each entry and between buffered chunks. Symbolic links are restored only
/// when their target stays inside `destination`.
pub(crate) fn unpack(
    archive: &mut ZipArchive<File>,
    destination: &Path,
    total_bytes: u64,
    progress: &mut UnpackProgress<'_>,
) -> Result<(), UnpackError> {
    progress.total_bytes = total_bytes;
    let mut links_created = false;

    for index in 0..archive.len() {
        progress.check()?;

        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| UnpackError::Failed(format!("unsafe entry path '{}'", entry.name())))?;
        let out_path = destination.join(&relative);

        if links_created && passes_through_link(destination, &relative) {
            return Err(UnpackError::Failed(format!(
                "entry '{}' is below a symbolic link",
                relative.display()
            )));
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if entry.is_symlink() {
            let mut target = String::new();
            (&mut entry).take(MAX_LINK_TARGET).read_to_string(&mut target)?;
            check_link_target(&relative, &target)?;
            write_link(&target, &out_path)?;
            links_created = true;
            progress.advance(target.len());
            continue;
        }

        let mut out_file = File::create(&out_path)?;
        copy_chunks(&mut entry, &mut out_file, progress)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(
                    &out_path,
                    std::fs::Permissions::from_mode(mode & 0o7777),
                )?;
            }
        }
    }

    progress.check()
}

/// Rejects link targets that could resolve outside the unpack root. Only
/// leading `..` components are accepted, and never more than the depth of
/// the directory holding the link.
fn check_link_target(link: &Path, target: &str) -> Result<(), UnpackError> {
    let escape = || {
        UnpackError::Failed(format!(
            "link '{}' points outside the archive ('{}')",
            link.display(),
            target
        ))
    };

    let mut depth = link
        .parent()
        .map(|parent| parent.components().count())
        .unwrap_or(0);
    let mut descended = false;

    for component in Path::new(target).components() {
        match component {
            Component::Normal(_) => {
                descended = true;
                depth += 1;
            }
            Component::ParentDir => {
                if descended || depth == 0 {
                    return Err(escape());
                }
                depth -= 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }

    if target.is_empty() {
        return Err(escape());
    }
    Ok(())
}

fn passes_through_link(destination: &Path, relative: &Path) -> bool {
    let mut current = destination.to_path_buf();
    let ancestors = relative.parent().map(Path::components);
    for component in ancestors.into_iter().flatten() {
        current.push(component);
        match current.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

#[cfg(unix)]
fn write_link(target: &str, out_path: &Path) -> Result<(), UnpackError> {
    std::os::unix::fs::symlink(target, out_path)?;
    Ok(())
}

/// Platforms without unprivileged symlinks get the target as file content.
#[cfg(not(unix))]
fn write_link(target: &str, out_path: &Path) -> Result<(), UnpackError> {
    std::fs::write(out_path, target)?;
    Ok(())
}

fn copy_chunks<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    progress: &mut UnpackProgress<'_>,
) -> Result<(), UnpackError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        progress.check()?;
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        progress.advance(read);
    }
    writer.flush()?;
    Ok(())
}
