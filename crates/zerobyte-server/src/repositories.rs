//! Repository administration, snapshot browsing and dumps

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use zerobyte_core::{
    file_name, normalize_absolute_path, prepare_snapshot_dump, BackendStatus, CompressionMode,
    PathKind, Repository, RepositoryConfig, RepositoryStatus, Snapshot, ROOT,
};
use zerobyte_volumes::VolumeManager;

use crate::cache::{keys, Cache};
use crate::catalog::{generate_short_id, Catalog, RepositoryUpdate};
use crate::context::RequestContext;
use crate::engine::{
    AbortHandle, BackupEngine, ByteStream, DumpCompletion, DumpOptions, RepositoryStats,
    RepositoryTarget, SnapshotEntry,
};
use crate::error::{ServiceError, ServiceResult};
use crate::events::{ServerEvent, ServerEvents};
use crate::metrics::Metrics;
use crate::validation::validate_name;

pub const TAR_CONTENT_TYPE: &str = "application/x-tar";
pub const FILE_CONTENT_TYPE: &str = "application/octet-stream";

const PATH_KIND_REQUIRED: &str = "Path kind is required when downloading a specific snapshot path";

/// A started dump, ready to be streamed to a client
pub struct DumpResult {
    pub stream: ByteStream,
    /// Resolves when the engine exits; failures surface here, not in the stream
    pub completion: DumpCompletion,
    pub abort: AbortHandle,
    pub filename: String,
    pub content_type: &'static str,
}

/// One page of a snapshot directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListing {
    pub snapshot_id: String,
    /// Listed directory, relative to the snapshot base
    pub path: String,
    pub entries: Vec<SnapshotEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Repository operations on behalf of an organization
pub struct RepositoryService {
    catalog: Arc<Catalog>,
    volumes: Arc<VolumeManager>,
    engine: Arc<dyn BackupEngine>,
    cache: Arc<Cache>,
    events: Arc<ServerEvents>,
    metrics: Arc<Metrics>,
    repository_base: PathBuf,
}

impl RepositoryService {
    pub fn new(
        catalog: Arc<Catalog>,
        volumes: Arc<VolumeManager>,
        engine: Arc<dyn BackupEngine>,
        cache: Arc<Cache>,
        events: Arc<ServerEvents>,
        metrics: Arc<Metrics>,
        repository_base: PathBuf,
    ) -> Self {
        Self {
            catalog,
            volumes,
            engine,
            cache,
            events,
            metrics,
            repository_base,
        }
    }

    pub async fn list_repositories(&self, ctx: &RequestContext) -> Vec<Repository> {
        self.catalog.list_repositories(Some(&ctx.organization_id)).await
    }

    pub async fn get_repository(&self, ctx: &RequestContext, id: &str) -> ServiceResult<Repository> {
        self.catalog
            .find_repository(&ctx.organization_id, id)
            .await
            .ok_or_else(|| ServiceError::not_found("Repository not found"))
    }

    /// Create a repository, initializing it in the engine unless it already
    /// exists. A local repository placed directly at the repository base is
    /// moved into `<base>/<shortId>`.
    #[instrument(skip(self, ctx, config), fields(org = %ctx.organization_id))]
    pub async fn create_repository(
        &self,
        ctx: &RequestContext,
        name: &str,
        config: RepositoryConfig,
        compression_mode: CompressionMode,
    ) -> ServiceResult<Repository> {
        validate_name(name)?;

        let mut short_id = generate_short_id();
        while self.catalog.short_id_in_use(&short_id).await {
            short_id = generate_short_id();
        }

        let config = match config {
            RepositoryConfig::Local {
                path,
                is_existing_repository,
            } => {
                if !path.trim().starts_with('/') {
                    return Err(ServiceError::bad_request("Repository path must be absolute"));
                }
                let path = normalize_absolute_path(Some(&path));
                let base = normalize_absolute_path(Some(&self.repository_base.to_string_lossy()));
                let path = if path == base {
                    PathBuf::from(&base).join(&short_id).to_string_lossy().into_owned()
                } else {
                    path
                };
                RepositoryConfig::Local {
                    path,
                    is_existing_repository,
                }
            }
            RepositoryConfig::Volume {
                volume_id,
                is_existing_repository,
            } => {
                let volume = self
                    .catalog
                    .find_volume(&ctx.organization_id, &volume_id)
                    .await
                    .ok_or_else(|| ServiceError::not_found("Volume not found"))?;
                RepositoryConfig::Volume {
                    volume_id: volume.id,
                    is_existing_repository,
                }
            }
        };

        let mut repository =
            Repository::new(&short_id, name, &ctx.organization_id, config, compression_mode);
        let target = self.resolve_target(&repository).await?;

        if !repository.config.is_existing_repository() {
            self.engine.init(&target).await?;
        }
        repository.status = RepositoryStatus::Healthy;

        self.catalog.insert_repository(repository.clone()).await;
        self.events.emit(ServerEvent::RepositoryCreated {
            organization_id: ctx.organization_id.clone(),
            repository_id: repository.short_id.clone(),
        });

        info!("Created repository {} at {}", repository.short_id, target.location);
        Ok(repository)
    }

    pub async fn update_repository(
        &self,
        ctx: &RequestContext,
        id: &str,
        update: RepositoryUpdate,
    ) -> ServiceResult<Repository> {
        let repository = self.get_repository(ctx, id).await?;
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        let updated = self
            .catalog
            .update_repository(&repository.id, update)
            .await
            .ok_or_else(|| ServiceError::not_found("Repository not found"))?;
        self.cache.del_by_prefix(&keys::repository(&repository.id));
        Ok(updated)
    }

    /// Forget a repository. Its data is left in place.
    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn delete_repository(&self, ctx: &RequestContext, id: &str) -> ServiceResult<()> {
        let repository = self.get_repository(ctx, id).await?;
        self.catalog.remove_repository(&repository.id).await;
        self.cache.del_by_prefix(&keys::repository(&repository.id));

        self.events.emit(ServerEvent::RepositoryDeleted {
            organization_id: ctx.organization_id.clone(),
            repository_id: repository.short_id.clone(),
        });
        Ok(())
    }

    /// Snapshots, newest first
    pub async fn list_snapshots(&self, ctx: &RequestContext, id: &str) -> ServiceResult<Vec<Snapshot>> {
        let repository = self.get_repository(ctx, id).await?;
        self.snapshots(&repository).await
    }

    pub async fn get_snapshot(
        &self,
        ctx: &RequestContext,
        id: &str,
        snapshot_id: &str,
    ) -> ServiceResult<Snapshot> {
        let repository = self.get_repository(ctx, id).await?;
        self.find_snapshot(&repository, snapshot_id).await
    }

    /// List one directory of a snapshot. Paths are relative to the snapshot's
    /// common ancestor, the same way dumps address them.
    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn list_snapshot_files(
        &self,
        ctx: &RequestContext,
        id: &str,
        snapshot_id: &str,
        path: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> ServiceResult<SnapshotListing> {
        let repository = self.get_repository(ctx, id).await?;
        let snapshot = self.find_snapshot(&repository, snapshot_id).await?;
        let plan = prepare_snapshot_dump(snapshot_id, snapshot.recorded_paths()?, path)?;

        let key_path = (plan.path != ROOT).then_some(plan.path.as_str());
        let key = keys::ls(&repository.id, snapshot_id, key_path, offset, limit);
        if let Some(listing) = self.cache.get::<SnapshotListing>(&key) {
            self.metrics.record_cache_lookup(true);
            return Ok(listing);
        }
        self.metrics.record_cache_lookup(false);

        let target = self.resolve_target(&repository).await?;
        let mut entries: Vec<SnapshotEntry> = self
            .engine
            .ls(&target, &plan.snapshot_ref, &plan.path)
            .await?
            .into_iter()
            .filter(|entry| entry.path != plan.path)
            .collect();
        entries.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));

        let total = entries.len();
        let entries = entries.into_iter().skip(offset).take(limit).collect();

        let listing = SnapshotListing {
            snapshot_id: snapshot_id.to_string(),
            path: plan.path,
            entries,
            total,
            offset,
            limit,
        };
        self.cache.set(&key, &listing);
        Ok(listing)
    }

    pub async fn repository_stats(&self, ctx: &RequestContext, id: &str) -> ServiceResult<RepositoryStats> {
        let repository = self.get_repository(ctx, id).await?;

        let key = keys::stats(&repository.id);
        if let Some(stats) = self.cache.get::<RepositoryStats>(&key) {
            self.metrics.record_cache_lookup(true);
            return Ok(stats);
        }
        self.metrics.record_cache_lookup(false);

        let target = self.resolve_target(&repository).await?;
        let stats = self.engine.stats(&target).await?;
        self.cache.set(&key, &stats);
        Ok(stats)
    }

    /// Run an engine integrity check and record the result as the
    /// repository's status
    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn check_repository(&self, ctx: &RequestContext, id: &str) -> ServiceResult<Repository> {
        let repository = self.get_repository(ctx, id).await?;
        let target = self.resolve_target(&repository).await?;

        let (status, last_error) = match self.engine.check(&target).await {
            Ok(()) => (RepositoryStatus::Healthy, None),
            Err(e) => {
                warn!("Repository {} failed its check: {}", repository.short_id, e);
                (RepositoryStatus::Error, Some(e.to_string()))
            }
        };

        self.cache.del_by_prefix(&keys::repository(&repository.id));
        self.catalog
            .set_repository_status(&repository.id, status, last_error)
            .await
            .ok_or_else(|| ServiceError::not_found("Repository not found"))
    }

    /// Start streaming `requested_path` (or the whole snapshot) out of a
    /// snapshot. Paths are interpreted relative to what the snapshot
    /// recorded, so host paths never reach the client.
    #[instrument(skip(self, ctx), fields(org = %ctx.organization_id))]
    pub async fn dump_snapshot(
        &self,
        ctx: &RequestContext,
        id: &str,
        snapshot_id: &str,
        requested_path: Option<&str>,
        kind: Option<PathKind>,
    ) -> ServiceResult<DumpResult> {
        if requested_path.is_some() && kind.is_none() {
            return Err(ServiceError::bad_request(PATH_KIND_REQUIRED));
        }

        let repository = self.get_repository(ctx, id).await?;
        let snapshot = self.find_snapshot(&repository, snapshot_id).await?;
        let plan = prepare_snapshot_dump(snapshot_id, snapshot.recorded_paths()?, requested_path)?;

        let (archive, filename, content_type) = match kind {
            Some(PathKind::File) => {
                let name = file_name(requested_path.unwrap_or_default());
                let name = if name.is_empty() { plan.filename.clone() } else { name };
                (false, name, FILE_CONTENT_TYPE)
            }
            _ => (true, plan.filename.clone(), TAR_CONTENT_TYPE),
        };

        let target = self.resolve_target(&repository).await?;
        let options = DumpOptions {
            organization_id: ctx.organization_id.clone(),
            path: plan.path.clone(),
            archive,
        };
        debug!("Dumping {} {} as {}", plan.snapshot_ref, plan.path, filename);
        let dump = self.engine.dump(&target, &plan.snapshot_ref, options).await?;

        self.metrics
            .record_dump(kind.map(|k| k.as_str()).unwrap_or("snapshot"));
        self.events.emit(ServerEvent::DumpStarted {
            organization_id: ctx.organization_id.clone(),
            repository_id: repository.short_id.clone(),
            snapshot_id: snapshot_id.to_string(),
            path: plan.path.clone(),
        });

        let completion = self.watch_completion(
            dump.completion,
            ctx.organization_id.clone(),
            repository.short_id.clone(),
            snapshot_id.to_string(),
        );

        Ok(DumpResult {
            stream: dump.stream,
            completion,
            abort: dump.abort,
            filename,
            content_type,
        })
    }

    /// Forward the engine's completion, emitting `dump:finished` on the way
    fn watch_completion(
        &self,
        completion: DumpCompletion,
        organization_id: String,
        repository_id: String,
        snapshot_id: String,
    ) -> DumpCompletion {
        let (tx, rx) = oneshot::channel();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = completion.await;
            events.emit(ServerEvent::DumpFinished {
                organization_id,
                repository_id,
                snapshot_id,
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
            let _ = tx.send(result);
        });

        DumpCompletion::new(rx)
    }

    /// Where the engine should find this repository
    async fn resolve_target(&self, repository: &Repository) -> ServiceResult<RepositoryTarget> {
        match &repository.config {
            RepositoryConfig::Local { path, .. } => {
                Ok(RepositoryTarget::new(path.clone(), repository.compression_mode))
            }
            RepositoryConfig::Volume { volume_id, .. } => {
                let volume = self
                    .catalog
                    .get_volume(volume_id)
                    .await
                    .ok_or_else(|| ServiceError::not_found("Repository volume not found"))?;
                let managed = self.volumes.get(&volume.id)?;
                if managed.status() != BackendStatus::Mounted {
                    return Err(ServiceError::conflict(format!(
                        "Volume {} is not mounted",
                        volume.name
                    )));
                }
                let location = repository.location_on(&managed.mount_path());
                Ok(RepositoryTarget::new(
                    location.to_string_lossy().into_owned(),
                    repository.compression_mode,
                ))
            }
        }
    }

    async fn snapshots(&self, repository: &Repository) -> ServiceResult<Vec<Snapshot>> {
        let key = keys::snapshots(&repository.id, None);
        if let Some(snapshots) = self.cache.get::<Vec<Snapshot>>(&key) {
            self.metrics.record_cache_lookup(true);
            return Ok(snapshots);
        }
        self.metrics.record_cache_lookup(false);

        let target = self.resolve_target(repository).await?;
        let mut snapshots = self.engine.snapshots(&target).await?;
        snapshots.sort_by(|a, b| b.time.cmp(&a.time));

        self.cache.set(&key, &snapshots);
        Ok(snapshots)
    }

    /// Look a snapshot up, refreshing a cached list once if it is missing
    async fn find_snapshot(&self, repository: &Repository, snapshot_id: &str) -> ServiceResult<Snapshot> {
        if let Some(snapshot) = self
            .snapshots(repository)
            .await?
            .into_iter()
            .find(|s| s.matches(snapshot_id))
        {
            return Ok(snapshot);
        }

        self.cache.del(&keys::snapshots(&repository.id, None));
        self.snapshots(repository)
            .await?
            .into_iter()
            .find(|s| s.matches(snapshot_id))
            .ok_or_else(|| ServiceError::not_found("Snapshot not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DumpStream, EngineError, EngineResult};
    use crate::metrics::MetricsConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::path::Path;
    use tempfile::TempDir;
    use zerobyte_core::{BackendConfig, Volume};

    const REPOSITORY_BASE: &str = "/var/lib/zerobyte/repositories";
    const BASE_PATH: &str = "/var/lib/zerobyte/volumes/vol123/_data";

    /// Engine double recording calls
    #[derive(Default)]
    struct MockEngine {
        snapshots: Mutex<Vec<Snapshot>>,
        entries: Mutex<Vec<SnapshotEntry>>,
        check_failure: Mutex<Option<String>>,
        inits: Mutex<Vec<String>>,
        dumps: Mutex<Vec<(String, String, DumpOptions)>>,
        lists: Mutex<Vec<(String, String)>>,
        snapshot_calls: Mutex<usize>,
    }

    #[async_trait]
    impl BackupEngine for MockEngine {
        async fn init(&self, target: &RepositoryTarget) -> EngineResult<()> {
            self.inits.lock().push(target.location.clone());
            Ok(())
        }

        async fn snapshots(&self, _target: &RepositoryTarget) -> EngineResult<Vec<Snapshot>> {
            *self.snapshot_calls.lock() += 1;
            Ok(self.snapshots.lock().clone())
        }

        async fn ls(
            &self,
            _target: &RepositoryTarget,
            snapshot_ref: &str,
            path: &str,
        ) -> EngineResult<Vec<SnapshotEntry>> {
            self.lists.lock().push((snapshot_ref.to_string(), path.to_string()));
            Ok(self.entries.lock().clone())
        }

        async fn stats(&self, _target: &RepositoryTarget) -> EngineResult<RepositoryStats> {
            Ok(RepositoryStats {
                total_size: 10,
                snapshots_count: self.snapshots.lock().len() as u64,
                ..Default::default()
            })
        }

        async fn check(&self, _target: &RepositoryTarget) -> EngineResult<()> {
            match self.check_failure.lock().clone() {
                Some(stderr) => Err(EngineError::Exit { code: 1, stderr }),
                None => Ok(()),
            }
        }

        async fn dump(
            &self,
            target: &RepositoryTarget,
            snapshot_ref: &str,
            options: DumpOptions,
        ) -> EngineResult<DumpStream> {
            self.dumps
                .lock()
                .push((target.location.clone(), snapshot_ref.to_string(), options));
            Ok(DumpStream {
                stream: futures::stream::iter(vec![Ok(Bytes::from_static(b"content"))]).boxed(),
                completion: DumpCompletion::ready(Ok(())),
                abort: AbortHandle::default(),
            })
        }
    }

    struct Harness {
        service: RepositoryService,
        engine: Arc<MockEngine>,
        catalog: Arc<Catalog>,
        events: Arc<ServerEvents>,
        volumes: Arc<VolumeManager>,
        ctx: RequestContext,
    }

    fn harness() -> Harness {
        let engine = Arc::new(MockEngine::default());
        let catalog = Arc::new(Catalog::new());
        let events = Arc::new(ServerEvents::default());
        let volumes = Arc::new(VolumeManager::default());
        let service = RepositoryService::new(
            catalog.clone(),
            volumes.clone(),
            engine.clone(),
            Arc::new(Cache::default()),
            events.clone(),
            Arc::new(Metrics::new(MetricsConfig::default()).unwrap()),
            PathBuf::from(REPOSITORY_BASE),
        );
        Harness {
            service,
            engine,
            catalog,
            events,
            volumes,
            ctx: RequestContext::new("org-1").with_user("user-1"),
        }
    }

    fn snapshot(id: &str, paths: &[&str]) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            short_id: id.to_string(),
            time: Utc::now(),
            tree: format!("tree-{}", id),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            hostname: "host".to_string(),
            tags: Vec::new(),
        }
    }

    impl Harness {
        async fn existing_repository(&self) -> Repository {
            let repository = Repository::new(
                &generate_short_id(),
                "Repository",
                &self.ctx.organization_id,
                RepositoryConfig::Local {
                    path: "/tmp/repository-test".into(),
                    is_existing_repository: true,
                },
                CompressionMode::Off,
            );
            self.catalog.insert_repository(repository.clone()).await;
            repository
        }

        fn with_snapshots(&self, snapshots: Vec<Snapshot>) {
            *self.engine.snapshots.lock() = snapshots;
        }
    }

    #[tokio::test]
    async fn test_create_scopes_repository_base_path() {
        let h = harness();
        let config = RepositoryConfig::Local {
            path: REPOSITORY_BASE.into(),
            is_existing_repository: false,
        };

        let created = h
            .service
            .create_repository(&h.ctx, "main repo", config, CompressionMode::Auto)
            .await
            .unwrap();

        let expected = format!("{}/{}", REPOSITORY_BASE, created.short_id);
        match &created.config {
            RepositoryConfig::Local { path, .. } => {
                assert_eq!(path, &expected);
                assert_ne!(path, REPOSITORY_BASE);
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert_eq!(created.status, RepositoryStatus::Healthy);
        assert_eq!(*h.engine.inits.lock(), vec![expected]);

        let stored = h.service.get_repository(&h.ctx, &created.short_id).await.unwrap();
        assert_eq!(stored.id, created.id);
    }

    #[tokio::test]
    async fn test_create_keeps_explicit_path() {
        let h = harness();
        let explicit = format!("{}/custom-{}", REPOSITORY_BASE, generate_short_id());
        let config = RepositoryConfig::Local {
            path: explicit.clone(),
            is_existing_repository: true,
        };

        let created = h
            .service
            .create_repository(&h.ctx, "custom repo", config, CompressionMode::Auto)
            .await
            .unwrap();

        assert!(matches!(&created.config, RepositoryConfig::Local { path, .. } if *path == explicit));
        assert_eq!(created.status, RepositoryStatus::Healthy);
        // Existing repositories are not re-initialized
        assert!(h.engine.inits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dump_uses_common_ancestor_selector() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("snapshot-123", &[BASE_PATH])]);
        let mut rx = h.events.subscribe();

        let requested = format!("{}/documents", BASE_PATH);
        let result = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "snapshot-123", Some(&requested), Some(PathKind::Dir))
            .await
            .unwrap();

        let dumps = h.engine.dumps.lock().clone();
        assert_eq!(dumps.len(), 1);
        let (location, snapshot_ref, options) = &dumps[0];
        assert_eq!(location, "/tmp/repository-test");
        assert_eq!(snapshot_ref, &format!("snapshot-123:{}", BASE_PATH));
        assert_eq!(
            options,
            &DumpOptions {
                organization_id: "org-1".into(),
                path: "/documents".into(),
                archive: true,
            }
        );
        assert_eq!(result.filename, "snapshot-snapshot-123.tar");
        assert_eq!(result.content_type, TAR_CONTENT_TYPE);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ServerEvent::DumpStarted {
                organization_id: "org-1".into(),
                repository_id: repository.short_id.clone(),
                snapshot_id: "snapshot-123".into(),
                path: "/documents".into(),
            }
        );
        assert_eq!(event.name(), "dump:started");
    }

    #[tokio::test]
    async fn test_dump_single_file_streams_raw() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("snapshot-file", &[BASE_PATH])]);

        let requested = format!("{}/documents/report.txt", BASE_PATH);
        let mut result = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "snapshot-file", Some(&requested), Some(PathKind::File))
            .await
            .unwrap();

        let (_, snapshot_ref, options) = h.engine.dumps.lock()[0].clone();
        assert_eq!(snapshot_ref, format!("snapshot-file:{}", BASE_PATH));
        assert_eq!(options.path, "/documents/report.txt");
        assert!(!options.archive);
        assert_eq!(result.filename, "report.txt");
        assert_eq!(result.content_type, "application/octet-stream");

        let chunk = result.stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"content");
        result.completion.await.unwrap();
    }

    #[tokio::test]
    async fn test_dump_rejects_path_without_kind() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("snapshot-no-kind", &[BASE_PATH])]);

        let requested = format!("{}/documents/report.txt", BASE_PATH);
        let err = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "snapshot-no-kind", Some(&requested), None)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ServiceError::BadRequest(_)));
        assert_eq!(
            err.to_string(),
            "Path kind is required when downloading a specific snapshot path"
        );
        assert!(h.engine.dumps.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dump_whole_snapshot_without_path() {
        let h = harness();
        let repository = h.existing_repository().await;
        let base = "/var/lib/zerobyte/volumes/vol555/_data";
        h.with_snapshots(vec![snapshot("snapshot-999", &[base])]);

        let result = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "snapshot-999", None, None)
            .await
            .unwrap();

        let (_, snapshot_ref, options) = h.engine.dumps.lock()[0].clone();
        assert_eq!(snapshot_ref, format!("snapshot-999:{}", base));
        assert_eq!(options.path, "/");
        assert!(options.archive);
        assert_eq!(result.filename, "snapshot-snapshot-999.tar");
    }

    #[tokio::test]
    async fn test_dump_rejects_path_outside_snapshot() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &[BASE_PATH])]);

        let err = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "s1", Some("/etc/passwd"), Some(PathKind::File))
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            ServiceError::Core(zerobyte_core::Error::PathOutsideSnapshot { .. })
        ));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_dump_completion_emits_finished() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &[BASE_PATH])]);
        let mut rx = h.events.subscribe();

        let result = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "s1", None, None)
            .await
            .unwrap();
        result.completion.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "dump:started");
        match rx.recv().await.unwrap() {
            ServerEvent::DumpFinished { success, error, .. } => {
                assert!(success);
                assert!(error.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_snapshot_and_repository() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &[BASE_PATH])]);

        let err = h
            .service
            .dump_snapshot(&h.ctx, &repository.short_id, "missing", None, None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), 404);

        let other_org = RequestContext::new("org-2");
        let err = h
            .service
            .list_snapshots(&other_org, &repository.short_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshots_are_cached_and_sorted() {
        let h = harness();
        let repository = h.existing_repository().await;
        let mut older = snapshot("old", &["/data"]);
        older.time = Utc::now() - Duration::days(1);
        h.with_snapshots(vec![older, snapshot("new", &["/data"])]);

        let first = h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(first[0].id, "new");
        h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(*h.engine.snapshot_calls.lock(), 1);

        // A snapshot missing from the cached list triggers one refresh
        h.with_snapshots(vec![snapshot("newer", &["/data"])]);
        let found = h.service.get_snapshot(&h.ctx, &repository.short_id, "newer").await.unwrap();
        assert_eq!(found.id, "newer");
        assert_eq!(*h.engine.snapshot_calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_update_repository_invalidates_cache() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &["/data"])]);

        h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(*h.engine.snapshot_calls.lock(), 1);

        let update = RepositoryUpdate {
            name: Some("renamed".into()),
            ..Default::default()
        };
        let updated = h
            .service
            .update_repository(&h.ctx, &repository.short_id, update)
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");

        h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(*h.engine.snapshot_calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_check_repository_records_status_and_invalidates() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &["/data"])]);

        h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        *h.engine.check_failure.lock() = Some("Fatal: repository is damaged".into());

        let checked = h.service.check_repository(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(checked.status, RepositoryStatus::Error);
        assert!(checked.last_error.unwrap().contains("damaged"));

        h.service.list_snapshots(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(*h.engine.snapshot_calls.lock(), 2);

        *h.engine.check_failure.lock() = None;
        let checked = h.service.check_repository(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(checked.status, RepositoryStatus::Healthy);
        assert!(checked.last_error.is_none());
    }

    #[tokio::test]
    async fn test_list_snapshot_files_is_relative_and_paged() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &[BASE_PATH])]);

        let entry = |name: &str, kind: &str| SnapshotEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            path: format!("/documents/{}", name),
            size: None,
            mtime: None,
        };
        *h.engine.entries.lock() = vec![
            SnapshotEntry {
                name: "documents".into(),
                kind: "dir".into(),
                path: "/documents".into(),
                size: None,
                mtime: None,
            },
            entry("b.txt", "file"),
            entry("a.txt", "file"),
            entry("photos", "dir"),
        ];

        let requested = format!("{}/documents", BASE_PATH);
        let listing = h
            .service
            .list_snapshot_files(&h.ctx, &repository.short_id, "s1", Some(&requested), 0, 2)
            .await
            .unwrap();

        assert_eq!(
            h.engine.lists.lock()[0],
            (format!("s1:{}", BASE_PATH), "/documents".to_string())
        );
        assert_eq!(listing.path, "/documents");
        assert_eq!(listing.total, 3);
        let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["photos", "a.txt"]);

        // Second call is served from the cache
        h.service
            .list_snapshot_files(&h.ctx, &repository.short_id, "s1", Some(&requested), 0, 2)
            .await
            .unwrap();
        assert_eq!(h.engine.lists.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_repository_stats_cached() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.with_snapshots(vec![snapshot("s1", &["/data"])]);

        let stats = h.service.repository_stats(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(stats.snapshots_count, 1);

        h.with_snapshots(Vec::new());
        let stats = h.service.repository_stats(&h.ctx, &repository.short_id).await.unwrap();
        assert_eq!(stats.snapshots_count, 1);
    }

    #[tokio::test]
    async fn test_volume_repository_requires_mounted_volume() {
        let h = harness();
        let temp_dir = TempDir::new().unwrap();
        let volume = Volume::new(
            "vol123",
            "disk",
            "org-1",
            BackendConfig::Local {
                path: temp_dir.path().to_string_lossy().into_owned(),
            },
            Path::new("/unused"),
        );
        h.catalog.insert_volume(volume.clone()).await;
        let managed = h.volumes.register(&volume).unwrap();

        let config = RepositoryConfig::Volume {
            volume_id: "vol123".into(),
            is_existing_repository: false,
        };
        let err = h
            .service
            .create_repository(&h.ctx, "on volume", config.clone(), CompressionMode::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        managed.mount().await;
        let created = h
            .service
            .create_repository(&h.ctx, "on volume", config, CompressionMode::Auto)
            .await
            .unwrap();
        assert_eq!(created.config.volume_id(), Some(volume.id.as_str()));
        assert_eq!(
            h.engine.inits.lock()[0],
            temp_dir.path().join(&created.short_id).to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_delete_repository() {
        let h = harness();
        let repository = h.existing_repository().await;
        h.service.delete_repository(&h.ctx, &repository.short_id).await.unwrap();
        assert!(h.service.get_repository(&h.ctx, &repository.short_id).await.is_err());
        assert!(h.service.list_repositories(&h.ctx).await.is_empty());
    }
}
