//! Atomic artifact publishing.
//!
//! Runners write artifacts through a temporary sibling and rename it into
//! place, so a failure partway through never leaves a declared output that a
//! later clean-check would classify as complete.

use crate::errors::PipelineError;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Writes bytes to `path` via a temporary sibling and atomic rename.
pub fn publish_file(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::config(format!("'{}' has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent.to_path_buf(), e))?;

    let tmp = staging_path(path)?;
    fs::write(&tmp, bytes).map_err(|e| PipelineError::io(tmp.clone(), e))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::io(path.to_path_buf(), e))
}

/// Serializes a value as pretty JSON and publishes it atomically.
pub fn publish_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::serialization(e.to_string()))?;
    publish_file(path, raw.as_bytes())
}

/// Recursively copies a directory tree, returning the number of files
/// copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Prepares an empty staging directory next to `dest` for a directory
/// artifact. Publish with [`swap_dir_into_place`].
pub fn staging_dir(dest: &Path) -> Result<std::path::PathBuf, PipelineError> {
    let staging = staging_path(dest)?;
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| PipelineError::io(staging.clone(), e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| PipelineError::io(staging.clone(), e))?;
    Ok(staging)
}

/// Replaces `dest` with the staged directory in one rename.
pub fn swap_dir_into_place(staging: &Path, dest: &Path) -> Result<(), PipelineError> {
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| PipelineError::io(dest.to_path_buf(), e))?;
    }
    fs::rename(staging, dest).map_err(|e| PipelineError::io(dest.to_path_buf(), e))
}

fn staging_path(dest: &Path) -> Result<std::path::PathBuf, PipelineError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PipelineError::config(format!("'{}' has no parent", dest.display())))?;
    let name = dest
        .file_name()
        .ok_or_else(|| PipelineError::config(format!("'{}' has no file name", dest.display())))?;
    Ok(parent.join(format!(".{}.publish", name.to_string_lossy())))
}
