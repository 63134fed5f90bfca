//! Generated-file bookkeeping.
//!
//! Every file ddev writes carries the `#ddev-generated` marker. A file with
//! the marker may be rewritten or removed on the next regeneration; a file
//! without it belongs to the user and is never touched.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const GENERATED_MARKER: &str = "#ddev-generated";

pub fn has_marker(contents: &str) -> bool {
    contents.contains(GENERATED_MARKER)
}

/// Whether ddev may (re)write `path`: it is absent or carries the marker.
pub fn is_overwritable(path: &Path) -> Result<bool> {
    match fs::read(path) {
        Ok(bytes) => Ok(has_marker(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(Error::Filesystem(format!(
            "Cannot read '{}': {}",
            path.display(),
            e
        ))),
    }
}

/// Write a generated file, refusing to clobber one the user has taken over.
///
/// Returns `Ok(false)` when the existing contents already match.
pub fn write_generated(path: &Path, contents: &str) -> Result<bool> {
    debug_assert!(has_marker(contents), "generated content must carry the marker");
    match fs::read_to_string(path) {
        Ok(existing) if existing == contents => return Ok(false),
        Ok(existing) if !has_marker(&existing) => {
            return Err(Error::ConfigFileSignature {
                path: path.to_path_buf(),
            })
        }
        _ => {}
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Filesystem(format!("Cannot create '{}': {}", parent.display(), e))
        })?;
    }
    atomic_write(path, contents.as_bytes())?;
    Ok(true)
}

/// Remove a generated file. Files without the marker are left alone.
pub fn remove_generated(path: &Path) -> Result<bool> {
    if !path.exists() || !is_overwritable(path)? {
        return Ok(false);
    }
    fs::remove_file(path)
        .map_err(|e| Error::Filesystem(format!("Cannot remove '{}': {}", path.display(), e)))?;
    Ok(true)
}

/// Write to a sibling temp file, fsync it, then rename it over `path`.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut file = fs::File::create(&temp_path).map_err(|e| {
        Error::Filesystem(format!("Failed to create '{}': {}", temp_path.display(), e))
    })?;
    file.write_all(contents)
        .map_err(|e| Error::Filesystem(format!("Failed to write '{}': {}", temp_path.display(), e)))?;
    file.sync_all()
        .map_err(|e| Error::Filesystem(format!("Failed to sync '{}': {}", temp_path.display(), e)))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Filesystem(format!("Failed to replace '{}': {}", path.display(), e))
    })?;
    Ok(())
}
