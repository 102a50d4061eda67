//! Per-volume lifecycle state machine
//!
//! `unmounted` is the initial state. A successful `mount` moves to `mounted`,
//! any failure moves to `error`, and `error` only clears on the next mount or
//! unmount. Mount and unmount hold the write half of the operation gate;
//! health checks share the read half so they never observe a half-finished
//! transition.
//!
//! A volume keeps its gate for as long as it is registered; configuration
//! changes swap the backend under the write half instead of replacing the
//! volume.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock as SyncRwLock};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use zerobyte_core::{BackendKind, BackendStatus};

use crate::backend::{BackendOutcome, VolumeBackend};
use crate::error::{VolumeError, VolumeResult};

/// Snapshot of a volume's runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeState {
    pub status: BackendStatus,
    pub last_error: Option<String>,
    pub last_reason: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// A backend plus the state it is in
pub struct ManagedVolume {
    id: String,
    backend: SyncRwLock<Arc<dyn VolumeBackend>>,
    gate: RwLock<()>,
    state: Mutex<VolumeState>,
}

impl std::fmt::Debug for ManagedVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedVolume")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ManagedVolume {
    pub fn new(id: impl Into<String>, backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            id: id.into(),
            backend: SyncRwLock::new(backend),
            gate: RwLock::new(()),
            state: Mutex::new(VolumeState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.backend().kind()
    }

    pub fn mount_path(&self) -> PathBuf {
        self.backend().mount_path().to_path_buf()
    }

    fn backend(&self) -> Arc<dyn VolumeBackend> {
        self.backend.read().clone()
    }

    pub fn state(&self) -> VolumeState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> BackendStatus {
        self.state.lock().status
    }

    #[instrument(skip(self), fields(volume = %self.id, backend = %self.kind()))]
    pub async fn mount(&self) -> BackendOutcome {
        let _guard = self.gate.write().await;

        if self.status() == BackendStatus::Mounted {
            return BackendOutcome::mounted();
        }

        match self.backend().mount().await {
            Ok(()) => {
                info!("Volume {} mounted at {}", self.id, self.mount_path().display());
                self.set_mounted();
                BackendOutcome::mounted()
            }
            Err(e) => {
                warn!("Failed to mount volume {}: {}", self.id, e);
                self.set_error(&e);
                BackendOutcome::failed(&e)
            }
        }
    }

    #[instrument(skip(self), fields(volume = %self.id, backend = %self.kind()))]
    pub async fn unmount(&self) -> BackendOutcome {
        let _guard = self.gate.write().await;

        match self.backend().unmount().await {
            Ok(()) => {
                info!("Volume {} unmounted", self.id);
                let mut state = self.state.lock();
                state.status = BackendStatus::Unmounted;
                state.last_error = None;
                state.last_reason = None;
                BackendOutcome::unmounted()
            }
            Err(e) => {
                warn!("Failed to unmount volume {}: {}", self.id, e);
                self.set_error(&e);
                BackendOutcome::failed(&e)
            }
        }
    }

    #[instrument(skip(self), fields(volume = %self.id))]
    pub async fn check_health(&self) -> BackendOutcome {
        let _guard = self.gate.read().await;

        let current = self.state();
        match current.status {
            BackendStatus::Unmounted => BackendOutcome::failed(&VolumeError::NotMounted),
            BackendStatus::Error => BackendOutcome {
                status: BackendStatus::Error,
                error: current.last_error,
                reason: current.last_reason,
            },
            BackendStatus::Mounted => match self.backend().check_health().await {
                Ok(()) => {
                    self.state.lock().last_checked = Some(Utc::now());
                    BackendOutcome::mounted()
                }
                Err(e) => {
                    warn!("Health check failed for volume {}: {}", self.id, e);
                    self.set_error(&e);
                    BackendOutcome::failed(&e)
                }
            },
        }
    }

    /// Replace the backend of an unmounted volume.
    ///
    /// Waits for any running mount or unmount. A volume that is mounted or in
    /// `error` may still be attached and is refused.
    #[instrument(skip(self, backend), fields(volume = %self.id))]
    pub async fn reconfigure(&self, backend: Arc<dyn VolumeBackend>) -> VolumeResult<()> {
        let _guard = self.gate.write().await;

        let status = self.status();
        if status != BackendStatus::Unmounted {
            return Err(VolumeError::InUse(format!(
                "volume {} is {}, unmount it first",
                self.id, status
            )));
        }

        *self.backend.write() = backend;
        info!("Volume {} reconfigured", self.id);
        Ok(())
    }

    /// Pick up a mount made by another process. An unmounted volume whose
    /// backend passes its health check is marked mounted; nothing is mounted.
    #[instrument(skip(self), fields(volume = %self.id))]
    pub async fn attach(&self) -> BackendOutcome {
        let _guard = self.gate.write().await;

        if self.status() == BackendStatus::Unmounted && self.backend().check_health().await.is_ok() {
            self.set_mounted();
        }

        let current = self.state();
        BackendOutcome {
            status: current.status,
            error: current.last_error,
            reason: current.last_reason,
        }
    }

    fn set_mounted(&self) {
        let mut state = self.state.lock();
        state.status = BackendStatus::Mounted;
        state.last_error = None;
        state.last_reason = None;
        state.last_checked = Some(Utc::now());
    }

    fn set_error(&self, error: &VolumeError) {
        let mut state = self.state.lock();
        state.status = BackendStatus::Error;
        state.last_error = Some(error.to_string());
        state.last_reason = Some(error.reason().to_string());
        state.last_checked = Some(Utc::now());
    }
}
