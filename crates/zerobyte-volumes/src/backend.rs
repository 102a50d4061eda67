//! Volume backend trait definitions
//!
//! Every storage protocol implements the same three operations. The
//! mounted/unmounted/error state machine lives in
//! [`ManagedVolume`](crate::managed::ManagedVolume); backends only perform
//! the protocol-specific work and report classified failures.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zerobyte_core::{BackendKind, BackendStatus};

use crate::error::{VolumeError, VolumeResult};

/// A mountable storage protocol
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Get the backend kind
    fn kind(&self) -> BackendKind;

    /// Where the volume's content becomes reachable
    fn mount_path(&self) -> &Path;

    /// Attach the volume at its mount path
    async fn mount(&self) -> VolumeResult<()>;

    /// Release the mount, tolerating an already detached path
    async fn unmount(&self) -> VolumeResult<()>;

    /// Read-only liveness probe of a mounted volume
    async fn check_health(&self) -> VolumeResult<()>;
}

/// Timeouts applied to helper processes and probes
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Upper bound for a mount helper
    pub mount_timeout: Duration,
    /// Upper bound for an unmount helper
    pub unmount_timeout: Duration,
    /// Upper bound for a health probe
    pub probe_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            mount_timeout: Duration::from_secs(30),
            unmount_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Status reported by mount, unmount and health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOutcome {
    pub status: BackendStatus,
    /// Failure message when `status` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BackendOutcome {
    pub fn mounted() -> Self {
        Self {
            status: BackendStatus::Mounted,
            error: None,
            reason: None,
        }
    }

    pub fn unmounted() -> Self {
        Self {
            status: BackendStatus::Unmounted,
            error: None,
            reason: None,
        }
    }

    pub fn failed(error: &VolumeError) -> Self {
        Self {
            status: BackendStatus::Error,
            error: Some(error.to_string()),
            reason: Some(error.reason().to_string()),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.status == BackendStatus::Mounted
    }
}
