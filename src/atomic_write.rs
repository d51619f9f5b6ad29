//! Atomic file writes: temp file + fsync + rename
//!
//! Every persisted artifact (cache entries, manifest, archive files) goes
//! through these helpers so an interrupted write leaves either the old
//! content or the new content, never a partial file.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Atomically write UTF-8 text to `path`.
///
/// The temporary file is created in the target's parent directory so the
/// final rename stays on one filesystem.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    write_bytes_atomic(path, content.as_bytes())
}

/// Atomically write raw bytes to `path`.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory: {parent}"))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in: {parent}"))?;
    temp.write_all(content)
        .context("failed to write temporary file")?;
    temp.as_file()
        .sync_all()
        .context("failed to fsync temporary file")?;
    temp.persist(path.as_std_path())
        .with_context(|| format!("failed to rename temporary file into place: {path}"))?;
    Ok(())
}

/// Atomically write a value as canonical JSON (RFC 8785).
///
/// Canonicalization gives version files and manifests a stable key order, so
/// re-serializing identical data yields byte-identical files.
pub fn write_json_canonical<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    let json = serde_json_canonicalizer::to_string(value)
        .with_context(|| format!("failed to canonicalize JSON for: {path}"))?;
    write_file_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use serde::Serialize;

    fn temp_target(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_target(&dir, "a/b/c.txt");
        write_file_atomic(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_target(&dir, "file.txt");
        write_file_atomic(&path, "old").unwrap();
        write_file_atomic(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_target(&dir, "file.txt");
        write_file_atomic(&path, "content").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_canonical_json_is_deterministic() {
        #[derive(Serialize)]
        struct Sample {
            zeta: u32,
            alpha: u32,
        }
        let dir = tempfile::tempdir().unwrap();
        let a = temp_target(&dir, "a.json");
        let b = temp_target(&dir, "b.json");
        let value = Sample { zeta: 1, alpha: 2 };
        write_json_canonical(&a, &value).unwrap();
        write_json_canonical(&b, &value).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
        // canonical form sorts keys
        assert_eq!(fs::read_to_string(&a).unwrap(), "{\"alpha\":2,\"zeta\":1}");
    }
}
