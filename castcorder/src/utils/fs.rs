//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / rename checks.

use std::path::{Path, PathBuf};

use crate::utils::filename::unique_path;
use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Size of a file in bytes, or `None` when it does not exist or cannot be read.
pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Move `path` into `dir`, keeping its file name unless that name is taken.
///
/// Falls back to copy + remove when a plain rename crosses filesystems.
pub async fn move_into(path: &Path, dir: &Path) -> Result<PathBuf> {
    ensure_dir_all_with_op("creating backup directory", dir).await?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("{} has no file name", path.display())))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let target = unique_path(dir, stem, ext);

    if tokio::fs::rename(path, &target).await.is_err() {
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| Error::io_path("copying", path, e))?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::io_path("removing", path, e))?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_nested_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir_all_with_op("creating output directory", &nested)
            .await
            .unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn file_size_of_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(file_size(&temp.path().join("missing.mp4")).await, None);
    }

    #[tokio::test]
    async fn move_into_keeps_file_name() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("rec.mp4");
        tokio::fs::write(&src, b"abc").await.unwrap();

        let moved = move_into(&src, &temp.path().join("failed")).await.unwrap();

        assert!(!src.exists());
        assert_eq!(moved, temp.path().join("failed").join("rec.mp4"));
        assert_eq!(tokio::fs::read(&moved).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn move_into_does_not_overwrite() {
        let temp = TempDir::new().unwrap();
        let failed = temp.path().join("failed");
        for body in [b"one", b"two"] {
            let src = temp.path().join("rec.mp4");
            tokio::fs::write(&src, body).await.unwrap();
            move_into(&src, &failed).await.unwrap();
        }

        assert_eq!(tokio::fs::read(failed.join("rec.mp4")).await.unwrap(), b"one");
        assert_eq!(tokio::fs::read(failed.join("rec (2).mp4")).await.unwrap(), b"two");
    }
}
