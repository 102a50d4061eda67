//! Filesystem liveness probe

use std::path::Path;
use std::time::Duration;

use tokio::fs;

use crate::error::{VolumeError, VolumeResult};

/// Stat the directory and read one entry, bounded by `timeout`.
///
/// A hung network filesystem blocks in the kernel rather than failing, so
/// the bound turns that into a classified timeout.
pub async fn probe_directory(path: &Path, timeout: Duration) -> VolumeResult<()> {
    let probe = async {
        let metadata = fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VolumeError::PathNotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                VolumeError::PermissionDenied(path.display().to_string())
            }
            _ => VolumeError::Probe(format!("{}: {}", path.display(), e)),
        })?;

        if !metadata.is_dir() {
            return Err(VolumeError::Probe(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| VolumeError::Probe(format!("{}: {}", path.display(), e)))?;
        entries
            .next_entry()
            .await
            .map_err(|e| VolumeError::Probe(format!("{}: {}", path.display(), e)))?;

        Ok(())
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(result) => result,
        Err(_) => Err(VolumeError::Timeout {
            helper: "health probe".to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_directory() {
        let temp_dir = TempDir::new().unwrap();
        probe_directory(temp_dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("gone");
        let err = probe_directory(&missing, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::PathNotFound(_)));
    }

    #[tokio::test]
    async fn test_probe_file_is_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = probe_directory(&file, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::Probe(_)));
    }
}
