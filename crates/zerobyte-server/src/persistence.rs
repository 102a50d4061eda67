//! Persistence layer for the volume and repository catalog
//!
//! Stores catalog state to JSON files on disk.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use zerobyte_core::{Repository, Volume};

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Base directory for data files
    pub data_dir: PathBuf,
}

impl PersistenceConfig {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    fn volumes_file(&self) -> PathBuf {
        self.data_dir.join("volumes.json")
    }

    fn repositories_file(&self) -> PathBuf {
        self.data_dir.join("repositories.json")
    }
}

/// Data format for volumes file
#[derive(Debug, Serialize, Deserialize)]
struct VolumesData {
    version: u32,
    volumes: Vec<Volume>,
}

/// Data format for repositories file
#[derive(Debug, Serialize, Deserialize)]
struct RepositoriesData {
    version: u32,
    repositories: Vec<Repository>,
}

/// Persistence manager
pub struct PersistenceManager {
    config: PersistenceConfig,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub async fn new(config: PersistenceConfig) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.data_dir).await?;

        info!("Persistence initialized at {:?}", config.data_dir);
        Ok(Self { config })
    }

    /// Load volumes from disk
    pub async fn load_volumes(&self) -> anyhow::Result<Vec<Volume>> {
        let path = self.config.volumes_file();
        if !fs::try_exists(&path).await? {
            info!("No volumes file found, starting fresh");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let data: VolumesData = serde_json::from_str(&content)?;

        info!("Loaded {} volumes from disk", data.volumes.len());
        Ok(data.volumes)
    }

    /// Save volumes to disk
    pub async fn save_volumes(&self, volumes: &[Volume]) -> anyhow::Result<()> {
        let data = VolumesData {
            version: 1,
            volumes: volumes.to_vec(),
        };
        self.write_atomic(&self.config.volumes_file(), &data).await
    }

    /// Load repositories from disk
    pub async fn load_repositories(&self) -> anyhow::Result<Vec<Repository>> {
        let path = self.config.repositories_file();
        if !fs::try_exists(&path).await? {
            info!("No repositories file found, starting fresh");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let data: RepositoriesData = serde_json::from_str(&content)?;

        info!("Loaded {} repositories from disk", data.repositories.len());
        Ok(data.repositories)
    }

    /// Save repositories to disk
    pub async fn save_repositories(&self, repositories: &[Repository]) -> anyhow::Result<()> {
        let data = RepositoriesData {
            version: 1,
            repositories: repositories.to_vec(),
        };
        self.write_atomic(&self.config.repositories_file(), &data).await
    }

    // Write to temp file first, then rename
    async fn write_atomic<T: Serialize>(&self, path: &Path, data: &T) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zerobyte_core::{BackendConfig, BackendStatus, CompressionMode, RepositoryConfig};

    #[tokio::test]
    async fn test_volume_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let manager = PersistenceManager::new(PersistenceConfig::new(temp_dir.path()))
            .await
            .unwrap();

        assert!(manager.load_volumes().await.unwrap().is_empty());

        let mut volume = Volume::new(
            "vol1",
            "nas",
            "org",
            BackendConfig::Nfs {
                server: "nas".into(),
                export_path: "/export".into(),
                port: 2049,
                version: "4.1".into(),
            },
            Path::new("/var/lib/zerobyte/volumes"),
        );
        volume.status = BackendStatus::Mounted;

        manager.save_volumes(&[volume.clone()]).await.unwrap();

        let loaded = manager.load_volumes().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, volume.id);
        assert_eq!(loaded[0].status, BackendStatus::Mounted);
        assert_eq!(loaded[0].config, volume.config);
    }

    #[tokio::test]
    async fn test_repository_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let manager = PersistenceManager::new(PersistenceConfig::new(temp_dir.path().join("nested")))
            .await
            .unwrap();

        let repository = Repository::new(
            "repo1",
            "main",
            "org",
            RepositoryConfig::Local {
                path: "/repos/repo1".into(),
                is_existing_repository: false,
            },
            CompressionMode::Max,
        );
        manager.save_repositories(&[repository]).await.unwrap();

        let loaded = manager.load_repositories().await.unwrap();
        assert_eq!(loaded[0].short_id, "repo1");
        assert_eq!(loaded[0].compression_mode, CompressionMode::Max);
        assert!(!temp_dir.path().join("nested/repositories.json.tmp").exists());
    }
}
