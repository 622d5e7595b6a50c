use std::path::Path;

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// cross-device moves.
///
/// The move is all-or-nothing: a failed copy removes the partial destination,
/// and a source that cannot be removed after copying causes the copy to be
/// rolled back so the source stays the only instance.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::symlink_metadata(src).is_err() {
        return Err(StorageError::NotFound(src.to_path_buf()));
    }
    if std::fs::symlink_metadata(dst).is_ok() {
        return Err(StorageError::AlreadyExists(dst.to_path_buf()));
    }

    // Fast path: atomic rename
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    // Slow path: copy then remove original
    if let Err(e) = std::fs::copy(src, dst) {
        let _ = std::fs::remove_file(dst);
        return Err(StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        });
    }

    if let Err(e) = std::fs::remove_file(src) {
        let _ = std::fs::remove_file(dst);
        return Err(StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        });
    }

    Ok(())
}

/// Copy a file, refusing to overwrite an existing destination.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, StorageError> {
    if std::fs::symlink_metadata(dst).is_ok() {
        return Err(StorageError::AlreadyExists(dst.to_path_buf()));
    }

    std::fs::copy(src, dst).map_err(|e| {
        let _ = std::fs::remove_file(dst);
        StorageError::CopyFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        }
    })
}

/// Remove a file or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<(), StorageError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StorageError::RemovePath {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::RemovePath {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
