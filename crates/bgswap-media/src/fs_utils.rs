//! Filesystem helpers for job working directories.

use std::path::Path;
use tokio::fs;

use crate::error::MediaResult;

/// Remove everything inside `dir`, creating it if it does not exist.
///
/// Entries that cannot be removed are logged and left in place; returns the
/// number of entries removed.
pub async fn clear_directory(dir: impl AsRef<Path>) -> MediaResult<usize> {
    let dir = dir.as_ref();

    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        tracing::debug!("Directory created: {}", dir.display());
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }

    tracing::debug!("Directory {} cleared ({} entries)", dir.display(), removed);
    Ok(removed)
}

/// Delete a directory tree, ignoring a missing directory.
pub async fn remove_dir_if_exists(dir: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_dir_all(dir.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to `path` via a temporary sibling and rename, so readers
/// never observe a partially written file.
pub async fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> MediaResult<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");

    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear_directory_removes_files_and_subdirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0000.png"), b"a").await.unwrap();
        fs::create_dir(dir.path().join("nested")).await.unwrap();
        fs::write(dir.path().join("nested").join("x"), b"b").await.unwrap();

        let removed = clear_directory(dir.path()).await.unwrap();

        assert_eq!(removed, 2);
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_directory_creates_missing() {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("output_frames");

        assert_eq!(clear_directory(&frames).await.unwrap(), 0);
        assert!(frames.is_dir());
    }

    #[tokio::test]
    async fn test_remove_dir_if_exists() {
        let dir = TempDir::new().unwrap();
        let job = dir.path().join("job");
        fs::create_dir(&job).await.unwrap();

        remove_dir_if_exists(&job).await.unwrap();
        assert!(!job.exists());
        remove_dir_if_exists(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_atomic() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("processing_complete.txt");

        write_atomic(&marker, b"Processing complete").await.unwrap();

        assert_eq!(fs::read_to_string(&marker).await.unwrap(), "Processing complete");
        assert!(!dir.path().join("processing_complete.tmp").exists());
    }
}
