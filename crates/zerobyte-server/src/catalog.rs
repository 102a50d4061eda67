//! In-memory catalog of volumes and repositories
//!
//! Generic updates never touch runtime status; only the lifecycle paths in
//! the services call the `set_*_status` methods.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::RwLock;
use zerobyte_core::{
    BackendConfig, BackendStatus, CompressionMode, Repository, RepositoryStatus, Volume,
};

/// Random lowercase short id
pub fn generate_short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Editable volume fields
#[derive(Debug, Clone, Default)]
pub struct VolumeUpdate {
    pub name: Option<String>,
    pub config: Option<BackendConfig>,
    pub auto_remount: Option<bool>,
}

/// Editable repository fields
#[derive(Debug, Clone, Default)]
pub struct RepositoryUpdate {
    pub name: Option<String>,
    pub compression_mode: Option<CompressionMode>,
}

/// Volumes and repositories keyed by id
pub struct Catalog {
    volumes: RwLock<HashMap<String, Volume>>,
    repositories: RwLock<HashMap<String, Repository>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(HashMap::new()),
            repositories: RwLock::new(HashMap::new()),
        }
    }

    /// Build a catalog from persisted records
    pub fn from_records(volumes: Vec<Volume>, repositories: Vec<Repository>) -> Self {
        Self {
            volumes: RwLock::new(volumes.into_iter().map(|v| (v.id.clone(), v)).collect()),
            repositories: RwLock::new(
                repositories.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ),
        }
    }

    pub async fn insert_volume(&self, volume: Volume) {
        self.volumes.write().await.insert(volume.id.clone(), volume);
    }

    /// Find a volume by id or short id within an organization
    pub async fn find_volume(&self, organization_id: &str, id: &str) -> Option<Volume> {
        let volumes = self.volumes.read().await;
        volumes
            .values()
            .find(|v| v.organization_id == organization_id && (v.id == id || v.short_id == id))
            .cloned()
    }

    pub async fn get_volume(&self, id: &str) -> Option<Volume> {
        self.volumes.read().await.get(id).cloned()
    }

    /// List volumes, optionally restricted to one organization
    pub async fn list_volumes(&self, organization_id: Option<&str>) -> Vec<Volume> {
        let volumes = self.volumes.read().await;
        let mut list: Vec<Volume> = volumes
            .values()
            .filter(|v| organization_id.map(|org| v.organization_id == org).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        list
    }

    pub async fn update_volume(&self, id: &str, update: VolumeUpdate) -> Option<Volume> {
        let mut volumes = self.volumes.write().await;
        let volume = volumes.get_mut(id)?;
        if let Some(name) = update.name {
            volume.name = name;
        }
        if let Some(config) = update.config {
            if let BackendConfig::Local { path } = &config {
                volume.mount_path = path.clone();
            }
            volume.config = config;
        }
        if let Some(auto_remount) = update.auto_remount {
            volume.auto_remount = auto_remount;
        }
        Some(volume.clone())
    }

    /// Record the lifecycle state of a volume
    pub async fn set_volume_status(
        &self,
        id: &str,
        status: BackendStatus,
        last_error: Option<String>,
        checked_at: Option<DateTime<Utc>>,
    ) -> Option<Volume> {
        let mut volumes = self.volumes.write().await;
        let volume = volumes.get_mut(id)?;
        volume.status = status;
        volume.last_error = last_error;
        if checked_at.is_some() {
            volume.last_health_check = checked_at;
        }
        Some(volume.clone())
    }

    pub async fn remove_volume(&self, id: &str) -> Option<Volume> {
        self.volumes.write().await.remove(id)
    }

    pub async fn insert_repository(&self, repository: Repository) {
        self.repositories
            .write()
            .await
            .insert(repository.id.clone(), repository);
    }

    /// Find a repository by id or short id within an organization
    pub async fn find_repository(&self, organization_id: &str, id: &str) -> Option<Repository> {
        let repositories = self.repositories.read().await;
        repositories
            .values()
            .find(|r| r.organization_id == organization_id && (r.id == id || r.short_id == id))
            .cloned()
    }

    pub async fn list_repositories(&self, organization_id: Option<&str>) -> Vec<Repository> {
        let repositories = self.repositories.read().await;
        let mut list: Vec<Repository> = repositories
            .values()
            .filter(|r| organization_id.map(|org| r.organization_id == org).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        list
    }

    /// Repositories stored on the given volume
    pub async fn repositories_on_volume(&self, volume_id: &str) -> Vec<Repository> {
        let repositories = self.repositories.read().await;
        repositories
            .values()
            .filter(|r| r.config.volume_id() == Some(volume_id))
            .cloned()
            .collect()
    }

    pub async fn update_repository(&self, id: &str, update: RepositoryUpdate) -> Option<Repository> {
        let mut repositories = self.repositories.write().await;
        let repository = repositories.get_mut(id)?;
        if let Some(name) = update.name {
            repository.name = name;
        }
        if let Some(mode) = update.compression_mode {
            repository.compression_mode = mode;
        }
        Some(repository.clone())
    }

    pub async fn set_repository_status(
        &self,
        id: &str,
        status: RepositoryStatus,
        last_error: Option<String>,
    ) -> Option<Repository> {
        let mut repositories = self.repositories.write().await;
        let repository = repositories.get_mut(id)?;
        repository.status = status;
        repository.last_error = last_error;
        Some(repository.clone())
    }

    pub async fn remove_repository(&self, id: &str) -> Option<Repository> {
        self.repositories.write().await.remove(id)
    }

    /// Whether a short id is already taken by any volume or repository
    pub async fn short_id_in_use(&self, short_id: &str) -> bool {
        self.volumes.read().await.values().any(|v| v.short_id == short_id)
            || self
                .repositories
                .read()
                .await
                .values()
                .any(|r| r.short_id == short_id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
