//! Registry of managed volumes keyed by volume id

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use zerobyte_core::Volume;

use crate::backend::{BackendOutcome, MountOptions, VolumeBackend};
use crate::error::{VolumeError, VolumeResult};
use crate::from_config;
use crate::managed::ManagedVolume;

/// Owns one [`ManagedVolume`] per registered volume
pub struct VolumeManager {
    volumes: RwLock<HashMap<String, Arc<ManagedVolume>>>,
    options: MountOptions,
}

impl VolumeManager {
    pub fn new(options: MountOptions) -> Self {
        Self {
            volumes: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Build the backend for `volume` and start tracking it.
    ///
    /// An id that is already registered keeps its entry, state and gate;
    /// configuration changes go through [`VolumeManager::reconfigure`].
    pub fn register(&self, volume: &Volume) -> VolumeResult<Arc<ManagedVolume>> {
        let backend = self.build(volume)?;
        Ok(self.register_backend(&volume.id, backend))
    }

    pub fn register_backend(&self, id: &str, backend: Arc<dyn VolumeBackend>) -> Arc<ManagedVolume> {
        self.volumes
            .write()
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Registered {} volume {}", backend.kind(), id);
                Arc::new(ManagedVolume::new(id, backend))
            })
            .clone()
    }

    /// Swap the backend of a registered, unmounted volume for one built from
    /// its new configuration
    pub async fn reconfigure(&self, volume: &Volume) -> VolumeResult<Arc<ManagedVolume>> {
        let backend = self.build(volume)?;
        let managed = self.get(&volume.id)?;
        managed.reconfigure(backend).await?;
        Ok(managed)
    }

    fn build(&self, volume: &Volume) -> VolumeResult<Arc<dyn VolumeBackend>> {
        volume.config.validate()?;
        from_config(&volume.config, Path::new(&volume.mount_path), self.options.clone())
    }

    pub fn get(&self, id: &str) -> VolumeResult<Arc<ManagedVolume>> {
        self.volumes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| VolumeError::NotRegistered(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ManagedVolume>> {
        let removed = self.volumes.write().remove(id);
        if removed.is_some() {
            info!("Removed volume {}", id);
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.volumes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn mount(&self, id: &str) -> VolumeResult<BackendOutcome> {
        Ok(self.get(id)?.mount().await)
    }

    pub async fn unmount(&self, id: &str) -> VolumeResult<BackendOutcome> {
        Ok(self.get(id)?.unmount().await)
    }

    pub async fn check_health(&self, id: &str) -> VolumeResult<BackendOutcome> {
        Ok(self.get(id)?.check_health().await)
    }

    /// Health check every volume that is not unmounted
    pub async fn check_all(&self) -> Vec<(String, BackendOutcome)> {
        let volumes: Vec<Arc<ManagedVolume>> = self.volumes.read().values().cloned().collect();

        let mut results = Vec::new();
        for volume in volumes {
            if volume.status() == zerobyte_core::BackendStatus::Unmounted {
                continue;
            }
            let outcome = volume.check_health().await;
            results.push((volume.id().to_string(), outcome));
        }
        results
    }
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new(MountOptions::default())
    }
}
