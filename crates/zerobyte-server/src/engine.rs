//! Backup engine abstraction
//!
//! The engine owns snapshot storage. Services talk to it through
//! [`BackupEngine`]; the production implementation drives restic
//! ([`crate::restic::ResticEngine`]).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use zerobyte_core::{CompressionMode, Snapshot};

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup engine exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Dump aborted")]
    Aborted,

    #[error("Failed to parse engine output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

/// Resolved repository location handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub location: String,
    pub compression: CompressionMode,
}

impl RepositoryTarget {
    pub fn new(location: impl Into<String>, compression: CompressionMode) -> Self {
        Self {
            location: location.into(),
            compression,
        }
    }
}

/// Options for a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOptions {
    pub organization_id: String,
    /// Path inside the snapshot reference
    pub path: String,
    /// Produce a tar archive instead of raw file bytes
    pub archive: bool,
}

/// One entry of a snapshot directory listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
}

impl SnapshotEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

/// Repository storage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStats {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_uncompressed_size: u64,
    #[serde(default)]
    pub compression_ratio: f64,
    #[serde(default)]
    pub total_blob_count: u64,
    #[serde(default)]
    pub snapshots_count: u64,
}

/// Dumped bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Resolves once the engine process has finished
pub struct DumpCompletion {
    rx: oneshot::Receiver<EngineResult<()>>,
}

impl DumpCompletion {
    pub fn new(rx: oneshot::Receiver<EngineResult<()>>) -> Self {
        Self { rx }
    }

    /// Completion that is already resolved
    pub fn ready(result: EngineResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> EngineResult<()> {
        self.await
    }
}

impl Future for DumpCompletion {
    type Output = EngineResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped supervisor never reports success
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(EngineError::Aborted)))
    }
}

/// Cancels a running dump
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A running dump: its output, its completion and a way to stop it
pub struct DumpStream {
    pub stream: ByteStream,
    pub completion: DumpCompletion,
    pub abort: AbortHandle,
}

/// Operations the services need from a backup engine
#[async_trait]
pub trait BackupEngine: Send + Sync {
    /// Create a new repository
    async fn init(&self, target: &RepositoryTarget) -> EngineResult<()>;

    /// All snapshots in the repository
    async fn snapshots(&self, target: &RepositoryTarget) -> EngineResult<Vec<Snapshot>>;

    /// Entries directly below `path` in `snapshot_ref`
    async fn ls(
        &self,
        target: &RepositoryTarget,
        snapshot_ref: &str,
        path: &str,
    ) -> EngineResult<Vec<SnapshotEntry>>;

    async fn stats(&self, target: &RepositoryTarget) -> EngineResult<RepositoryStats>;

    /// Verify repository integrity
    async fn check(&self, target: &RepositoryTarget) -> EngineResult<()>;

    /// Start streaming `path` out of `snapshot_ref`
    async fn dump(
        &self,
        target: &RepositoryTarget,
        snapshot_ref: &str,
        options: DumpOptions,
    ) -> EngineResult<DumpStream>;
}
