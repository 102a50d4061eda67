//! Volume backend lifecycle for zerobyte
//!
//! Mounts local directories and network filesystems (SFTP, SMB, NFS) at a
//! volume's mount path, probes their health and releases them again.

pub mod backend;
pub mod command;
pub mod error;
pub mod local;
pub mod managed;
pub mod manager;
pub mod nfs;
pub mod probe;
mod remote;
pub mod sftp;
pub mod smb;

use std::path::Path;
use std::sync::Arc;

use zerobyte_core::BackendConfig;

pub use backend::{BackendOutcome, MountOptions, VolumeBackend};
pub use command::MountCommand;
pub use error::{VolumeError, VolumeResult};
pub use local::LocalBackend;
pub use managed::{ManagedVolume, VolumeState};
pub use manager::VolumeManager;
pub use nfs::NfsBackend;
pub use sftp::SftpBackend;
pub use smb::SmbBackend;

/// Create a backend from its configuration
pub fn from_config(
    config: &BackendConfig,
    mount_path: &Path,
    options: MountOptions,
) -> VolumeResult<Arc<dyn VolumeBackend>> {
    let backend: Arc<dyn VolumeBackend> = match config {
        BackendConfig::Local { path } => {
            if Path::new(path) != mount_path {
                return Err(VolumeError::Config(format!(
                    "local volume {} cannot be mounted at {}",
                    path,
                    mount_path.display()
                )));
            }
            Arc::new(LocalBackend::new(path, options))
        }
        BackendConfig::Sftp {
            host,
            username,
            password,
            path,
            port,
            skip_host_key_check,
        } => Arc::new(SftpBackend::new(
            host,
            username,
            password,
            path,
            *port,
            *skip_host_key_check,
            mount_path,
            options,
        )),
        BackendConfig::Smb {
            server,
            share,
            username,
            password,
            vers,
            port,
            domain,
        } => Arc::new(SmbBackend::new(
            server,
            share,
            username,
            password,
            vers,
            *port,
            domain.as_deref(),
            mount_path,
            options,
        )),
        BackendConfig::Nfs {
            server,
            export_path,
            port,
            version,
        } => Arc::new(NfsBackend::new(server, export_path, *port, version, mount_path, options)),
    };

    Ok(backend)
}
