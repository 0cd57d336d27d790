//! Byte-level file operations. Every path handed in here has already been
//! through [`super::confine`].

use std::fs;
use std::io;
use std::path::Path;

use crate::errors::{AppError, AppResult};

pub fn read_file(path: &Path) -> AppResult<Vec<u8>> {
    if path.is_dir() {
        return Err(AppError::NotFound);
    }
    fs::read(path).map_err(AppError::from_io)
}

/// Creates or truncates `path`. The parent directory must already exist.
pub fn write_file(path: &Path, content: &[u8]) -> AppResult<()> {
    if path.is_dir() {
        return Err(AppError::CreationConflict(format!("{} is a directory", path.display())));
    }
    fs::write(path, content).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AppError::NotFound,
        _ => AppError::CreationConflict(e.to_string()),
    })
}

/// Creates `path` and any missing parents; fails if it already exists.
pub fn create_dir(path: &Path) -> AppResult<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(AppError::CreationConflict(format!("{} already exists", path.display())));
    }
    fs::create_dir_all(path).map_err(|e| AppError::CreationConflict(e.to_string()))
}

/// Removes a file, or a directory with everything in it. The root itself
/// cannot be deleted.
pub fn delete_item(root: &Path, path: &Path) -> AppResult<()> {
    let canon_root = dunce::canonicalize(root).map_err(AppError::from_io)?;
    if path == canon_root {
        return Err(AppError::Forbidden);
    }
    let meta = fs::symlink_metadata(path).map_err(AppError::from_io)?;
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AppError::NotFound,
        _ => AppError::Failed(e.to_string()),
    })
}
