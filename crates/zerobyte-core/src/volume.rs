//! Volume model and protocol-tagged backend configuration

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Directory inside a volume's mount root that receives the mount itself
pub const VOLUME_DATA_DIR: &str = "_data";

fn default_sftp_port() -> u16 {
    22
}

fn default_smb_port() -> u16 {
    445
}

fn default_smb_version() -> String {
    "3.0".to_string()
}

fn default_nfs_port() -> u16 {
    2049
}

fn default_nfs_version() -> String {
    "4.1".to_string()
}

fn default_auto_remount() -> bool {
    true
}

/// Storage protocol backing a volume, discriminated by `backend`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BackendConfig {
    /// A directory on the local host
    Local { path: String },
    /// Remote directory over SSH (sshfs)
    Sftp {
        host: String,
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        path: String,
        #[serde(default = "default_sftp_port")]
        port: u16,
        #[serde(default)]
        skip_host_key_check: bool,
    },
    /// CIFS/SMB share
    Smb {
        server: String,
        share: String,
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default = "default_smb_version")]
        vers: String,
        #[serde(default = "default_smb_port")]
        port: u16,
        #[serde(default)]
        domain: Option<String>,
    },
    /// NFS export
    Nfs {
        server: String,
        export_path: String,
        #[serde(default = "default_nfs_port")]
        port: u16,
        #[serde(default = "default_nfs_version")]
        version: String,
    },
}

/// Backend kind without its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Sftp,
    Smb,
    Nfs,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Sftp => "sftp",
            BackendKind::Smb => "smb",
            BackendKind::Nfs => "nfs",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BackendConfig {
    /// Get the backend kind
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local { .. } => BackendKind::Local,
            BackendConfig::Sftp { .. } => BackendKind::Sftp,
            BackendConfig::Smb { .. } => BackendKind::Smb,
            BackendConfig::Nfs { .. } => BackendKind::Nfs,
        }
    }

    /// Whether mounting involves a network filesystem helper
    pub fn is_remote(&self) -> bool {
        !matches!(self, BackendConfig::Local { .. })
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        fn require(field: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{} is required", field)));
            }
            Ok(())
        }

        match self {
            BackendConfig::Local { path } => {
                require("path", path)?;
                if !path.starts_with('/') {
                    return Err(Error::InvalidConfig(
                        "local volume path must be absolute".to_string(),
                    ));
                }
            }
            BackendConfig::Sftp { host, username, port, .. } => {
                require("host", host)?;
                require("username", username)?;
                if *port == 0 {
                    return Err(Error::InvalidConfig("port must be non-zero".to_string()));
                }
            }
            BackendConfig::Smb { server, share, username, port, .. } => {
                require("server", server)?;
                require("share", share)?;
                require("username", username)?;
                if *port == 0 {
                    return Err(Error::InvalidConfig("port must be non-zero".to_string()));
                }
            }
            BackendConfig::Nfs { server, export_path, .. } => {
                require("server", server)?;
                require("exportPath", export_path)?;
            }
        }
        Ok(())
    }
}

// Credentials stay out of logs
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            BackendConfig::Sftp { host, username, path, port, skip_host_key_check, .. } => f
                .debug_struct("Sftp")
                .field("host", host)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("path", path)
                .field("port", port)
                .field("skip_host_key_check", skip_host_key_check)
                .finish(),
            BackendConfig::Smb { server, share, username, vers, port, domain, .. } => f
                .debug_struct("Smb")
                .field("server", server)
                .field("share", share)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("vers", vers)
                .field("port", port)
                .field("domain", domain)
                .finish(),
            BackendConfig::Nfs { server, export_path, port, version } => f
                .debug_struct("Nfs")
                .field("server", server)
                .field("export_path", export_path)
                .field("port", port)
                .field("version", version)
                .finish(),
        }
    }
}

/// Runtime mount status, shared by mount, unmount and health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Mounted,
    #[default]
    Unmounted,
    Error,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Mounted => "mounted",
            BackendStatus::Unmounted => "unmounted",
            BackendStatus::Error => "error",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mountable storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub organization_id: String,
    pub config: BackendConfig,
    /// Where the volume's content is reachable on this host
    pub mount_path: String,
    #[serde(default)]
    pub status: BackendStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Remount on daemon start if it was mounted before shutdown
    #[serde(default = "default_auto_remount")]
    pub auto_remount: bool,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Create a new unmounted volume.
    ///
    /// Local volumes are used in place; network volumes are mounted under
    /// `<volume_base>/<short_id>/_data`.
    pub fn new(
        short_id: &str,
        name: &str,
        organization_id: &str,
        config: BackendConfig,
        volume_base: &Path,
    ) -> Self {
        let mount_path = match &config {
            BackendConfig::Local { path } => path.clone(),
            _ => volume_base
                .join(short_id)
                .join(VOLUME_DATA_DIR)
                .to_string_lossy()
                .into_owned(),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            short_id: short_id.to_string(),
            name: name.to_string(),
            organization_id: organization_id.to_string(),
            config,
            mount_path,
            status: BackendStatus::Unmounted,
            last_error: None,
            last_health_check: None,
            auto_remount: true,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_tagging() {
        let json = r#"{"backend":"smb","server":"nas","share":"backups","username":"u","password":"p"}"#;
        let config: BackendConfig = serde_json::from_str(json).unwrap();
        match &config {
            BackendConfig::Smb { vers, port, domain, .. } => {
                assert_eq!(vers, "3.0");
                assert_eq!(*port, 445);
                assert!(domain.is_none());
            }
            other => panic!("Expected SMB config, got {:?}", other),
        }
        assert_eq!(config.kind(), BackendKind::Smb);

        let json = r#"{"backend":"sftp","host":"h","username":"u","password":"p","skipHostKeyCheck":true}"#;
        let config: BackendConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config, BackendConfig::Sftp { port: 22, skip_host_key_check: true, .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = BackendConfig::Sftp {
            host: "h".into(),
            username: "u".into(),
            password: "hunter2".into(),
            path: String::new(),
            port: 22,
            skip_host_key_check: false,
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_validate() {
        assert!(BackendConfig::Local { path: "/srv".into() }.validate().is_ok());
        assert!(BackendConfig::Local { path: "srv".into() }.validate().is_err());
        let nfs = BackendConfig::Nfs {
            server: "".into(),
            export_path: "/export".into(),
            port: 2049,
            version: "4.1".into(),
        };
        assert!(nfs.validate().is_err());
    }

    #[test]
    fn test_volume_mount_path() {
        let base = Path::new("/var/lib/zerobyte/volumes");
        let local = Volume::new("abc", "disk", "org", BackendConfig::Local { path: "/mnt/disk".into() }, base);
        assert_eq!(local.mount_path, "/mnt/disk");
        assert_eq!(local.status, BackendStatus::Unmounted);

        let nfs = Volume::new(
            "vol123",
            "nas",
            "org",
            BackendConfig::Nfs {
                server: "nas".into(),
                export_path: "/export".into(),
                port: 2049,
                version: "4.1".into(),
            },
            base,
        );
        assert_eq!(nfs.mount_path, "/var/lib/zerobyte/volumes/vol123/_data");
    }
}
