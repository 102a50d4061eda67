//! Volume administration and lifecycle

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use zerobyte_core::{BackendConfig, BackendStatus, Volume};
use zerobyte_volumes::{BackendOutcome, ManagedVolume, VolumeError, VolumeManager};

use crate::cache::{keys, Cache};
use crate::catalog::{generate_short_id, Catalog, VolumeUpdate};
use crate::context::RequestContext;
use crate::error::{ServiceError, ServiceResult};
use crate::events::{ServerEvent, ServerEvents};
use crate::metrics::Metrics;
use crate::validation::{validate_backend_config, validate_name};

/// Creates, mounts, probes and removes volumes
pub struct VolumeService {
    catalog: Arc<Catalog>,
    manager: Arc<VolumeManager>,
    cache: Arc<Cache>,
    events: Arc<ServerEvents>,
    metrics: Arc<Metrics>,
    volume_base: PathBuf,
}

impl VolumeService {
    pub fn new(
        catalog: Arc<Catalog>,
        manager: Arc<VolumeManager>,
        cache: Arc<Cache>,
        events: Arc<ServerEvents>,
        metrics: Arc<Metrics>,
        volume_base: PathBuf,
    ) -> Self {
        Self {
            catalog,
            manager,
            cache,
            events,
            metrics,
            volume_base,
        }
    }

    pub async fn list_volumes(&self, ctx: &RequestContext) -> Vec<Volume> {
        self.catalog.list_volumes(Some(&ctx.organization_id)).await
    }

    pub async fn get_volume(&self, ctx: &RequestContext, id: &str) -> ServiceResult<Volume> {
        self.catalog
            .find_volume(&ctx.organization_id, id)
            .await
            .ok_or_else(|| ServiceError::not_found("Volume not found"))
    }

    #[instrument(skip(self, ctx, config), fields(org = %ctx.organization_id, backend = %config.kind()))]
    pub async fn create_volume(
        &self,
        ctx: &RequestContext,
        name: &str,
        config: BackendConfig,
    ) -> ServiceResult<Volume> {
        validate_name(name)?;
        validate_backend_config(&config)?;

        let mut short_id = generate_short_id();
        while self.catalog.short_id_in_use(&short_id).await {
            short_id = generate_short_id();
        }

        let volume = Volume::new(&short_id, name, &ctx.organization_id, config, &self.volume_base);
        self.manager.register(&volume)?;
        self.catalog.insert_volume(volume.clone()).await;

        info!("Created {} volume {} ({})", volume.kind(), volume.name, volume.short_id);
        Ok(volume)
    }

    /// Rename, reconfigure or toggle auto-remount. Reconfiguring requires the
    /// volume to be unmounted.
    #[instrument(skip(self, ctx, update), fields(org = %ctx.organization_id))]
    pub async fn update_volume(
        &self,
        ctx: &RequestContext,
        id: &str,
        update: VolumeUpdate,
    ) -> ServiceResult<Volume> {
        let volume = self.get_volume(ctx, id).await?;

        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        if let Some(config) = &update.config {
            validate_backend_config(config)?;
            if config.kind() != volume.kind() {
                return Err(ServiceError::bad_request("Volume backend cannot be changed"));
            }

            let mut candidate = volume.clone();
            if let BackendConfig::Local { path } = config {
                candidate.mount_path = path.clone();
            }
            candidate.config = config.clone();

            // Swaps the backend under the volume's gate, so a mount in flight
            // finishes first and a mounted volume is refused
            self.manager.reconfigure(&candidate).await.map_err(|e| match e {
                VolumeError::InUse(_) => {
                    ServiceError::conflict("Unmount the volume before changing its configuration")
                }
                other => ServiceError::from(other),
            })?;
        }

        let reconfigured = update.config.is_some();
        let updated = self
            .catalog
            .update_volume(&volume.id, update)
            .await
            .ok_or_else(|| ServiceError::not_found("Volume not found"))?;

        if reconfigured {
            return self
                .catalog
                .set_volume_status(&updated.id, BackendStatus::Unmounted, None, None)
                .await
                .ok_or_else(|| ServiceError::not_found("Volume not found"));
        }

        Ok(updated)
    }

    /// Delete a volume no repository depends on, unmounting it first
    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn delete_volume(&self, ctx: &RequestContext, id: &str) -> ServiceResult<()> {
        let volume = self.get_volume(ctx, id).await?;

        let dependents = self.catalog.repositories_on_volume(&volume.id).await;
        if !dependents.is_empty() {
            return Err(ServiceError::conflict(format!(
                "Volume is used by {} repositories",
                dependents.len()
            )));
        }

        if let Ok(managed) = self.manager.get(&volume.id) {
            if managed.status() != BackendStatus::Unmounted {
                let outcome = managed.unmount().await;
                if outcome.status == BackendStatus::Error {
                    return Err(ServiceError::conflict(format!(
                        "Failed to unmount volume: {}",
                        outcome.error.unwrap_or_default()
                    )));
                }
            }
        }

        self.manager.remove(&volume.id);
        self.catalog.remove_volume(&volume.id).await;
        info!("Deleted volume {} ({})", volume.name, volume.short_id);
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn mount(&self, ctx: &RequestContext, id: &str) -> ServiceResult<BackendOutcome> {
        let volume = self.get_volume(ctx, id).await?;
        let outcome = self.managed(&volume)?.mount().await;
        self.record(&volume, "mount", &outcome).await;
        Ok(outcome)
    }

    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn unmount(&self, ctx: &RequestContext, id: &str) -> ServiceResult<BackendOutcome> {
        let volume = self.get_volume(ctx, id).await?;
        let outcome = self.managed(&volume)?.unmount().await;
        self.record(&volume, "unmount", &outcome).await;
        Ok(outcome)
    }

    pub async fn check_health(&self, ctx: &RequestContext, id: &str) -> ServiceResult<BackendOutcome> {
        let volume = self.get_volume(ctx, id).await?;
        let outcome = self.managed(&volume)?.check_health().await;
        self.record(&volume, "health", &outcome).await;
        Ok(outcome)
    }

    /// Probe every mounted or failed volume; used by the background poller.
    ///
    /// Failed mounts are not retried here; they stay in `error` until an
    /// explicit mount.
    pub async fn check_all(&self) -> Vec<(String, BackendOutcome)> {
        let results = self.manager.check_all().await;
        for (id, outcome) in &results {
            if let Some(volume) = self.catalog.get_volume(id).await {
                self.record(&volume, "health", outcome).await;
            }
        }
        self.update_status_metrics().await;
        results
    }

    /// Register every catalogued volume and remount the ones that were
    /// mounted when the daemon last stopped.
    pub async fn restore(&self, auto_remount: bool) -> usize {
        let mut remounted = 0;

        for volume in self.catalog.list_volumes(None).await {
            let was_mounted = volume.status == BackendStatus::Mounted;

            if let Err(e) = self.manager.register(&volume) {
                warn!("Cannot register volume {}: {}", volume.short_id, e);
                self.catalog
                    .set_volume_status(&volume.id, BackendStatus::Error, Some(e.to_string()), None)
                    .await;
                continue;
            }

            // Runtime state does not survive a restart
            let Some(volume) = self
                .catalog
                .set_volume_status(&volume.id, BackendStatus::Unmounted, None, None)
                .await
            else {
                continue;
            };

            if auto_remount && was_mounted && volume.auto_remount {
                info!("Remounting volume {} ({})", volume.name, volume.short_id);
                if let Ok(managed) = self.manager.get(&volume.id) {
                    let outcome = managed.mount().await;
                    if outcome.is_mounted() {
                        remounted += 1;
                    }
                    self.record(&volume, "mount", &outcome).await;
                }
            }
        }

        self.update_status_metrics().await;
        remounted
    }

    /// Register every catalogued volume and adopt the mounts another process
    /// already holds, without mounting, unmounting or emitting events.
    ///
    /// Volumes recorded as mounted are checked in place and keep their status
    /// only if the mount is still healthy. Returns the number adopted.
    pub async fn attach_existing(&self) -> usize {
        let mut attached = 0;

        for volume in self.catalog.list_volumes(None).await {
            let managed = match self.manager.register(&volume) {
                Ok(managed) => managed,
                Err(e) => {
                    warn!("Cannot register volume {}: {}", volume.short_id, e);
                    continue;
                }
            };

            if volume.status != BackendStatus::Mounted {
                continue;
            }

            let outcome = managed.attach().await;
            if outcome.is_mounted() {
                attached += 1;
            } else {
                self.catalog
                    .set_volume_status(&volume.id, outcome.status, None, None)
                    .await;
            }
        }

        attached
    }

    /// Unmount network volumes on shutdown
    pub async fn shutdown(&self) {
        for volume in self.catalog.list_volumes(None).await {
            if !volume.config.is_remote() {
                continue;
            }
            if let Ok(managed) = self.manager.get(&volume.id) {
                if managed.status() == BackendStatus::Mounted {
                    let outcome = managed.unmount().await;
                    if let Some(error) = outcome.error {
                        warn!("Failed to unmount {} on shutdown: {}", volume.short_id, error);
                    }
                }
            }
        }
    }

    /// Managed handle for a catalogued volume
    pub fn managed(&self, volume: &Volume) -> ServiceResult<Arc<ManagedVolume>> {
        Ok(self.manager.get(&volume.id)?)
    }

    /// Persist the outcome, invalidate dependent caches and emit events
    async fn record(&self, volume: &Volume, operation: &str, outcome: &BackendOutcome) {
        self.metrics
            .record_mount_operation(volume.kind().as_str(), operation, outcome.status);

        let checked_at = (operation == "health" || outcome.status == BackendStatus::Mounted)
            .then(Utc::now);
        let last_error = match outcome.status {
            BackendStatus::Error => outcome.error.clone(),
            _ => None,
        };

        // Unmounted volumes report "not mounted" from health checks without
        // changing state
        if operation == "health" && volume.status == BackendStatus::Unmounted {
            return;
        }

        self.catalog
            .set_volume_status(&volume.id, outcome.status, last_error, checked_at)
            .await;

        if volume.status != outcome.status {
            for repository in self.catalog.repositories_on_volume(&volume.id).await {
                self.cache.del_by_prefix(&keys::repository(&repository.id));
            }

            let organization_id = volume.organization_id.clone();
            let volume_id = volume.short_id.clone();
            let event = match (operation, outcome.status) {
                ("mount", BackendStatus::Mounted) => ServerEvent::VolumeMounted {
                    organization_id,
                    volume_id,
                },
                ("unmount", BackendStatus::Unmounted) => ServerEvent::VolumeUnmounted {
                    organization_id,
                    volume_id,
                },
                (_, status) => ServerEvent::VolumeStatusChanged {
                    organization_id,
                    volume_id,
                    status,
                    error: outcome.error.clone(),
                },
            };
            self.events.emit(event);
        }
    }

    async fn update_status_metrics(&self) {
        let mut counts: Vec<(BackendStatus, usize)> = Vec::new();
        for volume in self.catalog.list_volumes(None).await {
            match counts.iter_mut().find(|(s, _)| *s == volume.status) {
                Some((_, c)) => *c += 1,
                None => counts.push((volume.status, 1)),
            }
        }
        self.metrics.update_volume_counts(&counts);
    }
}
