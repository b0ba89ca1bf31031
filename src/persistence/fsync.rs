//! Durable file writes.
//!
//! A rename only survives power loss once the parent directory has been
//! synced as well, so every atomic write here syncs the temp file, renames it
//! over the target, then syncs the directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Flushes a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to disk.
///
/// Fails if the path does not exist.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Replaces `path` with `bytes` so that readers see either the old or the new
/// contents, never a partial write.
///
/// Writes `<path>.tmp`, syncs it, renames it over `path`, then syncs the parent
/// directory. The parent directory is created if missing.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(tmp_path, path)?;

    if let Some(parent) = parent {
        fsync_dir(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parent_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        write_atomic(&path, b"{}").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[test]
    fn fsync_dir_fails_on_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(fsync_dir(&dir.path().join("missing")).is_err());
    }
}
