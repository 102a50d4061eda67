//! Lifecycle events
//!
//! Events are broadcast to in-process subscribers and logged under the
//! `events` target.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use zerobyte_core::BackendStatus;

/// Something that happened to a volume, repository or dump
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ServerEvent {
    DumpStarted {
        organization_id: String,
        repository_id: String,
        snapshot_id: String,
        path: String,
    },
    DumpFinished {
        organization_id: String,
        repository_id: String,
        snapshot_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    VolumeMounted {
        organization_id: String,
        volume_id: String,
    },
    VolumeUnmounted {
        organization_id: String,
        volume_id: String,
    },
    VolumeStatusChanged {
        organization_id: String,
        volume_id: String,
        status: BackendStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RepositoryCreated {
        organization_id: String,
        repository_id: String,
    },
    RepositoryDeleted {
        organization_id: String,
        repository_id: String,
    },
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::DumpStarted { .. } => "dump:started",
            ServerEvent::DumpFinished { .. } => "dump:finished",
            ServerEvent::VolumeMounted { .. } => "volume:mounted",
            ServerEvent::VolumeUnmounted { .. } => "volume:unmounted",
            ServerEvent::VolumeStatusChanged { .. } => "volume:status_changed",
            ServerEvent::RepositoryCreated { .. } => "repository:created",
            ServerEvent::RepositoryDeleted { .. } => "repository:deleted",
        }
    }

    /// Whether the event reflects a change to persisted catalog state
    pub fn changes_catalog(&self) -> bool {
        !matches!(
            self,
            ServerEvent::DumpStarted { .. } | ServerEvent::DumpFinished { .. }
        )
    }

    pub fn organization_id(&self) -> &str {
        match self {
            ServerEvent::DumpStarted { organization_id, .. }
            | ServerEvent::DumpFinished { organization_id, .. }
            | ServerEvent::VolumeMounted { organization_id, .. }
            | ServerEvent::VolumeUnmounted { organization_id, .. }
            | ServerEvent::VolumeStatusChanged { organization_id, .. }
            | ServerEvent::RepositoryCreated { organization_id, .. }
            | ServerEvent::RepositoryDeleted { organization_id, .. } => organization_id,
        }
    }
}

/// Broadcast hub for [`ServerEvent`]s
pub struct ServerEvents {
    sender: broadcast::Sender<ServerEvent>,
}

impl ServerEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Log and broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ServerEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        info!(
            target: "events",
            event = event.name(),
            organization = event.organization_id(),
            "{}", payload
        );
        let _ = self.sender.send(event);
    }
}

impl Default for ServerEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
