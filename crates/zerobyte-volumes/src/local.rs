//! Local directory backend
//!
//! The configured directory is used in place; there is nothing to attach or
//! release, only to verify.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::instrument;
use zerobyte_core::BackendKind;

use crate::backend::{MountOptions, VolumeBackend};
use crate::error::{VolumeError, VolumeResult};
use crate::probe::probe_directory;

/// Local filesystem volume
pub struct LocalBackend {
    path: PathBuf,
    options: MountOptions,
}

impl LocalBackend {
    pub fn new(path: impl AsRef<Path>, options: MountOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
        }
    }
}

#[async_trait]
impl VolumeBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn mount_path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn mount(&self) -> VolumeResult<()> {
        match fs::metadata(&self.path).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(VolumeError::Config(format!(
                "{} is not a directory",
                self.path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VolumeError::PathNotFound(self.path.display().to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(VolumeError::PermissionDenied(self.path.display().to_string()))
            }
            Err(e) => Err(VolumeError::Io(e)),
        }
    }

    async fn unmount(&self) -> VolumeResult<()> {
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn check_health(&self) -> VolumeResult<()> {
        probe_directory(&self.path, self.options.probe_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mount_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path(), MountOptions::default());

        backend.mount().await.unwrap();
        backend.check_health().await.unwrap();
        backend.unmount().await.unwrap();
        assert_eq!(backend.mount_path(), temp_dir.path());
    }

    #[tokio::test]
    async fn test_mount_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path().join("missing"), MountOptions::default());

        let err = backend.mount().await.unwrap_err();
        assert!(matches!(err, VolumeError::PathNotFound(_)));
    }
}
