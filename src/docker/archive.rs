//! Tar streams for `docker cp`.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Build an in-memory tar of `src`.
///
/// A directory contributes its contents (not the directory itself); a file
/// contributes a single entry named after it. Entries whose path relative to
/// `src` starts with `exclusion` are skipped.
pub fn pack(src: &Path, exclusion: Option<&str>) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let meta = std::fs::symlink_metadata(src)?;
    if meta.is_dir() {
        let exclusion = exclusion
            .map(|e| e.trim_start_matches("./").trim_end_matches('/'))
            .filter(|e| !e.is_empty());
        append_dir_contents(&mut builder, src, Path::new(""), exclusion)?;
    } else {
        let name = src
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
        builder.append_path_with_name(src, name)?;
    }

    builder.into_inner()
}

fn append_dir_contents(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    rel: &Path,
    exclusion: Option<&str>,
) -> io::Result<()> {
    let dir = root.join(rel);
    let mut entries: Vec<_> = std::fs::read_dir(&dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let rel_path = rel.join(entry.file_name());
        if let Some(excl) = exclusion {
            if rel_path.starts_with(excl) {
                continue;
            }
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&rel_path, entry.path())?;
            append_dir_contents(builder, root, &rel_path, exclusion)?;
        } else {
            builder.append_path_with_name(entry.path(), &rel_path)?;
        }
    }
    Ok(())
}

/// Unpack a `docker cp <container>:<src> -` stream into `dst`.
///
/// The engine wraps the copied path in a top-level entry named after it; that
/// component is stripped so `dst` receives the contents. A single-file stream
/// is written to `dst` itself, or into it when `dst` is an existing directory.
pub fn unpack(bytes: &[u8], dst: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(bytes);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut components = path.components().filter(|c| matches!(c, Component::Normal(_)));
        let first = match components.next() {
            Some(c) => c,
            None => continue,
        };
        let rest: PathBuf = components.collect();

        let target = if rest.as_os_str().is_empty() {
            if entry.header().entry_type().is_dir() {
                std::fs::create_dir_all(dst)?;
                continue;
            }
            if dst.is_dir() {
                dst.join(first)
            } else {
                dst.to_path_buf()
            }
        } else {
            dst.join(rest)
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pack_directory_contents_with_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("certs")).unwrap();
        fs::create_dir_all(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("certs/a.crt"), "crt").unwrap();
        fs::write(dir.path().join("tmp/skip.txt"), "x").unwrap();
        fs::write(dir.path().join("top.yaml"), "y").unwrap();

        let bytes = pack(dir.path(), Some("tmp")).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n == "certs/a.crt"));
        assert!(names.iter().any(|n| n == "top.yaml"));
        assert!(!names.iter().any(|n| n.starts_with("tmp")));
    }

    #[test]
    fn unpack_strips_the_wrapping_directory() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("config/sub")).unwrap();
        fs::write(src.path().join("config/sub/x.yaml"), "x").unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all("config", src.path().join("config")).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dst = tempfile::tempdir().unwrap();
        unpack(&bytes, dst.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("sub/x.yaml")).unwrap(), "x");
    }

    #[test]
    fn unpack_single_file_into_directory() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("dump.sql");
        fs::write(&file, "select 1;").unwrap();
        let bytes = pack(&file, None).unwrap();

        let dst = tempfile::tempdir().unwrap();
        unpack(&bytes, dst.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("dump.sql")).unwrap(), "select 1;");
    }
}
