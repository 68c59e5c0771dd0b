//! Filesystem storage for session frames
//!
//! Scratch directories live under the configured scratch root, one per
//! session. Directory creation and removal are idempotent.

pub mod watcher;

pub use watcher::FrameWatcher;

use crate::recorder::collaborators::FrameStorage;
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// `FrameStorage` backed by the local filesystem
#[derive(Debug, Clone)]
pub struct FsStorage {
    scratch_root: PathBuf,
}

impl FsStorage {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }
}

/// Directory-name-safe form of a source name
pub fn normalize_source_name(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

#[async_trait]
impl FrameStorage for FsStorage {
    async fn create_scratch(&self, source_id: &str) -> AppResult<PathBuf> {
        let dir = self.scratch_root.join(format!(
            "{}-{}",
            normalize_source_name(source_id),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Storage(format!("failed to create scratch dir {:?}: {}", dir, e))
        })?;
        Ok(dir)
    }

    async fn create_dir(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "failed to create {:?}: {}",
                path, e
            ))),
        }
    }

    async fn write_frame(&self, path: &Path, bytes: &[u8]) -> AppResult<()> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("failed to write {:?}: {}", path, e)))
    }

    async fn read_frame(&self, path: &Path) -> AppResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Storage(format!("failed to read {:?}: {}", path, e)))
    }

    async fn remove_dir_all(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "failed to remove {:?}: {}",
                path, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_source_name() {
        assert_eq!(normalize_source_name("Front Door"), "Front_Door");
        assert_eq!(normalize_source_name("garage/side"), "garage_side");
    }

    #[tokio::test]
    async fn test_scratch_lifecycle() {
        let root = tempdir().unwrap();
        let storage = FsStorage::new(root.path());

        let scratch = storage.create_scratch("Back Yard").await.unwrap();
        assert!(scratch.starts_with(root.path()));
        assert!(scratch
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("Back_Yard-"));

        let frame = scratch.join("frame_0001.png");
        storage.write_frame(&frame, b"abc").await.unwrap();
        assert_eq!(storage.read_frame(&frame).await.unwrap(), b"abc");

        storage.remove_dir_all(&scratch).await.unwrap();
        assert!(!scratch.exists());
        // Removing twice is fine
        storage.remove_dir_all(&scratch).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_dir_is_idempotent() {
        let root = tempdir().unwrap();
        let storage = FsStorage::new(root.path());
        let day = root.path().join("captures").join("2024-05-01");
        storage.create_dir(&day).await.unwrap();
        storage.create_dir(&day).await.unwrap();
        assert!(day.is_dir());
    }

    #[tokio::test]
    async fn test_scratch_dirs_are_unique() {
        let root = tempdir().unwrap();
        let storage = FsStorage::new(root.path());
        let a = storage.create_scratch("cam").await.unwrap();
        let b = storage.create_scratch("cam").await.unwrap();
        assert_ne!(a, b);
    }
}
