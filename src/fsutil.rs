//! Atomic file writes.
//!
//! Every file spacedump produces (pages, attachments, sidebar artifacts and
//! patched documents) is written to a temp file in the destination directory
//! and renamed over the target. A reader never observes a half-written file,
//! and an interrupted run leaves either the old content or the new one.

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `bytes` to `path` atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `contents` only when it differs from what is on disk.
///
/// Returns `true` when the file was (re)written.
pub fn write_if_changed(path: &Path, contents: &str) -> std::io::Result<bool> {
    match std::fs::read(path) {
        Ok(existing) if existing == contents.as_bytes() => Ok(false),
        _ => {
            write_atomic(path, contents.as_bytes())?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a/b/c.txt");
        write_atomic(&target, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn replaces_existing_file_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("page.html");
        write_atomic(&target, b"old").unwrap();
        write_atomic(&target, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        let entries = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn write_if_changed_skips_identical_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("x.html");
        assert!(write_if_changed(&target, "same").unwrap());
        let before = std::fs::metadata(&target).unwrap().modified().unwrap();
        assert!(!write_if_changed(&target, "same").unwrap());
        assert_eq!(std::fs::metadata(&target).unwrap().modified().unwrap(), before);
        assert!(write_if_changed(&target, "different").unwrap());
    }
}
