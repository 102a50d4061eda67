//! Backup repository model

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a repository's data lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RepositoryConfig {
    /// A bare directory on this host
    Local {
        path: String,
        /// Repository was initialised elsewhere; skip `init`
        #[serde(default)]
        is_existing_repository: bool,
    },
    /// `<volume mount path>/<repository short id>`
    Volume {
        volume_id: String,
        #[serde(default)]
        is_existing_repository: bool,
    },
}

impl RepositoryConfig {
    pub fn is_existing_repository(&self) -> bool {
        match self {
            RepositoryConfig::Local { is_existing_repository, .. }
            | RepositoryConfig::Volume { is_existing_repository, .. } => *is_existing_repository,
        }
    }

    /// Volume backing this repository, if any
    pub fn volume_id(&self) -> Option<&str> {
        match self {
            RepositoryConfig::Volume { volume_id, .. } => Some(volume_id),
            RepositoryConfig::Local { .. } => None,
        }
    }
}

/// Engine compression setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Off,
    #[default]
    Auto,
    Max,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::Off => "off",
            CompressionMode::Auto => "auto",
            CompressionMode::Max => "max",
        }
    }
}

/// Result of the last repository check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryStatus {
    Healthy,
    Error,
    #[default]
    Unknown,
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepositoryStatus::Healthy => "healthy",
            RepositoryStatus::Error => "error",
            RepositoryStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A backup engine storage target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    /// Short human-facing id, also the directory name on volumes
    pub short_id: String,
    pub name: String,
    pub organization_id: String,
    pub config: RepositoryConfig,
    #[serde(default)]
    pub compression_mode: CompressionMode,
    #[serde(default)]
    pub status: RepositoryStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(
        short_id: &str,
        name: &str,
        organization_id: &str,
        config: RepositoryConfig,
        compression_mode: CompressionMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            short_id: short_id.to_string(),
            name: name.to_string(),
            organization_id: organization_id.to_string(),
            config,
            compression_mode,
            status: RepositoryStatus::Unknown,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Location of a volume-backed repository given the volume's mount path
    pub fn location_on(&self, mount_path: &Path) -> PathBuf {
        mount_path.join(&self.short_id)
    }
}
