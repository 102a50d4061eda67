//! Server configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zerobyte_volumes::MountOptions;

use crate::metrics::MetricsConfig;

/// Default directory for catalog files
pub const DEFAULT_DATA_DIR: &str = "/var/lib/zerobyte/data";
/// Default root for repositories created without an explicit location
pub const REPOSITORY_BASE: &str = "/var/lib/zerobyte/repositories";
/// Default root under which network volumes are mounted
pub const VOLUME_BASE: &str = "/var/lib/zerobyte/volumes";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Data directory for persistence
    pub data_dir: String,
    /// Root for local repositories
    pub repository_base: String,
    /// Root for network volume mount points
    pub volume_base: String,
    /// Organization used by the CLI and single-tenant installs
    pub default_organization: String,
    /// Seconds between catalog saves
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
    /// Backup engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// Mount helper timeouts
    #[serde(default)]
    pub mounts: MountConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Volume health polling
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_persist_interval() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            repository_base: REPOSITORY_BASE.to_string(),
            volume_base: VOLUME_BASE.to_string(),
            default_organization: "default".to_string(),
            persist_interval_secs: default_persist_interval(),
            engine: EngineConfig::default(),
            mounts: MountConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults overridden by `ZEROBYTE_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ZEROBYTE_DATA_DIR") {
            config.data_dir = dir;
        }

        if let Ok(base) = std::env::var("ZEROBYTE_REPOSITORY_BASE") {
            config.repository_base = base;
        }

        if let Ok(base) = std::env::var("ZEROBYTE_VOLUME_BASE") {
            config.volume_base = base;
        }

        if let Ok(org) = std::env::var("ZEROBYTE_DEFAULT_ORGANIZATION") {
            config.default_organization = org;
        }

        if let Ok(bin) = std::env::var("ZEROBYTE_RESTIC_BIN") {
            config.engine.binary = bin;
        }

        if let Ok(file) = std::env::var("ZEROBYTE_RESTIC_PASSWORD_FILE") {
            config.engine.password_file = Some(file);
        }

        if let Ok(dir) = std::env::var("ZEROBYTE_RESTIC_CACHE_DIR") {
            config.engine.cache_dir = Some(dir);
        }

        if let Ok(secs) = std::env::var("ZEROBYTE_MOUNT_TIMEOUT_SECS") {
            config.mounts.mount_timeout_secs = secs.parse().map_err(|_| {
                anyhow::anyhow!("ZEROBYTE_MOUNT_TIMEOUT_SECS must be a number, got {:?}", secs)
            })?;
        }

        if let Ok(secs) = std::env::var("ZEROBYTE_HEALTH_INTERVAL_SECS") {
            config.health.interval_secs = secs.parse().map_err(|_| {
                anyhow::anyhow!("ZEROBYTE_HEALTH_INTERVAL_SECS must be a number, got {:?}", secs)
            })?;
        }

        Ok(config)
    }

    /// Set data directory for persistence
    pub fn with_data_dir(mut self, path: &str) -> Self {
        self.data_dir = path.to_string();
        self
    }

    pub fn with_repository_base(mut self, path: &str) -> Self {
        self.repository_base = path.to_string();
        self
    }

    pub fn with_volume_base(mut self, path: &str) -> Self {
        self.volume_base = path.to_string();
        self
    }

    /// Use a different restic binary
    pub fn with_engine_binary(mut self, binary: &str) -> Self {
        self.engine.binary = binary.to_string();
        self
    }

    /// Disable the background health poller
    pub fn without_health_checks(mut self) -> Self {
        self.health.enabled = false;
        self
    }

    pub fn repository_base_path(&self) -> PathBuf {
        PathBuf::from(&self.repository_base)
    }

    pub fn volume_base_path(&self) -> PathBuf {
        PathBuf::from(&self.volume_base)
    }
}

/// Backup engine (restic) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable
    pub binary: String,
    /// File holding the repository password
    pub password_file: Option<String>,
    /// Engine metadata cache directory
    pub cache_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "restic".to_string(),
            password_file: None,
            cache_dir: None,
        }
    }
}

/// Mount helper and probe timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub mount_timeout_secs: u64,
    pub unmount_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_timeout_secs: 30,
            unmount_timeout_secs: 15,
            probe_timeout_secs: 10,
        }
    }
}

impl MountConfig {
    pub fn options(&self) -> MountOptions {
        MountOptions {
            mount_timeout: Duration::from_secs(self.mount_timeout_secs),
            unmount_timeout: Duration::from_secs(self.unmount_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of entries written without an explicit TTL
    pub default_ttl_secs: u64,
    /// Interval between sweeps of expired entries
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60 * 60 * 24,
            purge_interval_secs: 600,
        }
    }
}

/// Volume health polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Run the background poller
    pub enabled: bool,
    /// Seconds between polls
    pub interval_secs: u64,
    /// Remount volumes that were mounted before shutdown
    pub auto_remount: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            auto_remount: true,
        }
    }
}
