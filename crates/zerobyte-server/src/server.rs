//! Daemon state and background loops
//!
//! Wires the catalog, caches, volume manager and backup engine together,
//! restores mounts on start and keeps health, persistence and cache sweeps
//! running until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use zerobyte_volumes::VolumeManager;

use crate::cache::Cache;
use crate::catalog::Catalog;
use crate::config::ServerConfig;
use crate::engine::BackupEngine;
use crate::events::ServerEvents;
use crate::metrics::Metrics;
use crate::persistence::{PersistenceConfig, PersistenceManager};
use crate::repositories::RepositoryService;
use crate::restic::ResticEngine;
use crate::volumes::VolumeService;

/// Server state
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Volume and repository records
    pub catalog: Arc<Catalog>,
    /// Engine result cache
    pub cache: Arc<Cache>,
    /// Event bus
    pub events: Arc<ServerEvents>,
    /// Metrics
    pub metrics: Arc<Metrics>,
    /// Persistence manager
    pub persistence: Arc<PersistenceManager>,
    /// Live volume backends
    pub volume_manager: Arc<VolumeManager>,
    pub volumes: VolumeService,
    pub repositories: RepositoryService,
}

impl ServerState {
    /// Create server state backed by the restic engine
    pub async fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(ResticEngine::new(config.engine.clone()));
        Self::with_engine(config, engine).await
    }

    /// Create server state with an explicit backup engine
    pub async fn with_engine(
        config: ServerConfig,
        engine: Arc<dyn BackupEngine>,
    ) -> anyhow::Result<Self> {
        let persistence = Arc::new(
            PersistenceManager::new(PersistenceConfig::new(&config.data_dir)).await?,
        );

        let volumes = persistence.load_volumes().await.unwrap_or_else(|e| {
            warn!("Failed to load volumes: {}", e);
            Vec::new()
        });
        let repositories = persistence.load_repositories().await.unwrap_or_else(|e| {
            warn!("Failed to load repositories: {}", e);
            Vec::new()
        });
        info!(
            "Loaded {} volumes, {} repositories from persistence",
            volumes.len(),
            repositories.len()
        );

        let catalog = Arc::new(Catalog::from_records(volumes, repositories));
        let cache = Arc::new(Cache::new(Duration::from_secs(config.cache.default_ttl_secs)));
        let events = Arc::new(ServerEvents::default());
        let metrics = Arc::new(Metrics::new(config.metrics.clone())?);
        let volume_manager = Arc::new(VolumeManager::new(config.mounts.options()));

        let volumes = VolumeService::new(
            catalog.clone(),
            volume_manager.clone(),
            cache.clone(),
            events.clone(),
            metrics.clone(),
            config.volume_base_path(),
        );
        let repositories = RepositoryService::new(
            catalog.clone(),
            volume_manager.clone(),
            engine,
            cache.clone(),
            events.clone(),
            metrics.clone(),
            config.repository_base_path(),
        );

        Ok(Self {
            config,
            catalog,
            cache,
            events,
            metrics,
            persistence,
            volume_manager,
            volumes,
            repositories,
        })
    }

    /// Save current state to persistence
    pub async fn save_state(&self) -> anyhow::Result<()> {
        let volumes = self.catalog.list_volumes(None).await;
        let repositories = self.catalog.list_repositories(None).await;

        self.persistence.save_volumes(&volumes).await?;
        self.persistence.save_repositories(&repositories).await?;

        debug!("Saved state to persistence");
        Ok(())
    }
}

/// Run the daemon until interrupted
#[instrument(skip(state))]
pub async fn run_server(state: Arc<ServerState>) -> anyhow::Result<()> {
    let remounted = state.volumes.restore(state.config.health.auto_remount).await;
    info!("Restored volumes, {} remounted", remounted);

    // Spawn volume health poller
    if state.config.health.enabled {
        let state_for_health = state.clone();
        let health_interval = Duration::from_secs(state.config.health.interval_secs);
        info!("Volume health checks every {}s", state.config.health.interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(health_interval);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                let results = state_for_health.volumes.check_all().await;
                let failing = results.iter().filter(|(_, o)| !o.is_mounted()).count();
                if failing > 0 {
                    warn!("{} of {} volumes failed their health check", failing, results.len());
                }
            }
        });
    }

    // Spawn periodic persistence save
    let state_for_save = state.clone();
    let save_interval = Duration::from_secs(state.config.persist_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(save_interval);
        loop {
            interval.tick().await;
            if let Err(e) = state_for_save.save_state().await {
                error!("Failed to save state: {}", e);
            }
        }
    });

    // Save after lifecycle changes
    let state_for_events = state.clone();
    let mut events = state.events.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if !event.changes_catalog() => continue,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Err(e) = state_for_events.save_state().await {
                        error!("Failed to save state: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Spawn cache sweep
    let state_for_cache = state.clone();
    let purge_interval = Duration::from_secs(state.config.cache.purge_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_interval);
        loop {
            interval.tick().await;
            let purged = state_for_cache.cache.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired cache entries", purged);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    // Saved before unmounting so mounted volumes come back on restart
    if let Err(e) = state.save_state().await {
        error!("Failed to save state: {}", e);
    }
    state.volumes.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use tempfile::TempDir;
    use zerobyte_core::{BackendConfig, BackendStatus, CompressionMode, RepositoryConfig};

    fn config(temp_dir: &TempDir) -> ServerConfig {
        ServerConfig::default()
            .with_data_dir(&temp_dir.path().join("data").to_string_lossy())
            .with_repository_base(&temp_dir.path().join("repos").to_string_lossy())
            .with_volume_base(&temp_dir.path().join("volumes").to_string_lossy())
            .without_health_checks()
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let disk = temp_dir.path().join("disk");
        std::fs::create_dir_all(&disk).unwrap();
        let ctx = RequestContext::new("default");

        let state = ServerState::from_config(config(&temp_dir)).await.unwrap();
        let volume = state
            .volumes
            .create_volume(
                &ctx,
                "disk",
                BackendConfig::Local {
                    path: disk.to_string_lossy().into_owned(),
                },
            )
            .await
            .unwrap();
        state.volumes.mount(&ctx, &volume.short_id).await.unwrap();

        let repository_path = temp_dir.path().join("existing");
        state
            .repositories
            .create_repository(
                &ctx,
                "existing",
                RepositoryConfig::Local {
                    path: repository_path.to_string_lossy().into_owned(),
                    is_existing_repository: true,
                },
                CompressionMode::Auto,
            )
            .await
            .unwrap();
        state.save_state().await.unwrap();

        let restarted = ServerState::from_config(config(&temp_dir)).await.unwrap();
        assert_eq!(restarted.repositories.list_repositories(&ctx).await.len(), 1);

        let remounted = restarted.volumes.restore(true).await;
        assert_eq!(remounted, 1);
        let restored = restarted.volumes.get_volume(&ctx, &volume.short_id).await.unwrap();
        assert_eq!(restored.status, BackendStatus::Mounted);
    }

    #[tokio::test]
    async fn test_restore_without_auto_remount() {
        let temp_dir = TempDir::new().unwrap();
        let disk = temp_dir.path().join("disk");
        std::fs::create_dir_all(&disk).unwrap();
        let ctx = RequestContext::new("default");

        let state = ServerState::from_config(config(&temp_dir)).await.unwrap();
        let volume = state
            .volumes
            .create_volume(
                &ctx,
                "disk",
                BackendConfig::Local {
                    path: disk.to_string_lossy().into_owned(),
                },
            )
            .await
            .unwrap();
        state.volumes.mount(&ctx, &volume.short_id).await.unwrap();
        state.save_state().await.unwrap();

        let restarted = ServerState::from_config(config(&temp_dir)).await.unwrap();
        assert_eq!(restarted.volumes.restore(false).await, 0);
        let restored = restarted.volumes.get_volume(&ctx, &volume.short_id).await.unwrap();
        assert_eq!(restored.status, BackendStatus::Unmounted);
    }
}
