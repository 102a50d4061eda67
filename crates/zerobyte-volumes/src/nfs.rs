//! NFS backend

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;
use zerobyte_core::BackendKind;

use crate::backend::{MountOptions, VolumeBackend};
use crate::command::MountCommand;
use crate::error::VolumeResult;
use crate::remote::{check_remote, mount_remote, unmount_remote};

/// NFS export
pub struct NfsBackend {
    server: String,
    export_path: String,
    port: u16,
    version: String,
    mount_path: PathBuf,
    options: MountOptions,
}

impl NfsBackend {
    pub fn new(
        server: &str,
        export_path: &str,
        port: u16,
        version: &str,
        mount_path: impl AsRef<Path>,
        options: MountOptions,
    ) -> Self {
        Self {
            server: server.to_string(),
            export_path: export_path.to_string(),
            port,
            version: version.to_string(),
            mount_path: mount_path.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn mount_command(&self) -> MountCommand {
        let export = if self.export_path.starts_with('/') {
            self.export_path.clone()
        } else {
            format!("/{}", self.export_path)
        };

        MountCommand::new("mount")
            .arg("-t")
            .arg("nfs")
            .arg("-o")
            .arg(format!("vers={},port={}", self.version, self.port))
            .arg(format!("{}:{}", self.server, export))
            .arg(self.mount_path.to_string_lossy())
    }
}

#[async_trait]
impl VolumeBackend for NfsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nfs
    }

    fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    #[instrument(skip(self), fields(server = %self.server, export = %self.export_path))]
    async fn mount(&self) -> VolumeResult<()> {
        mount_remote(&self.mount_path, self.mount_command(), &self.options).await
    }

    #[instrument(skip(self), fields(mount_path = %self.mount_path.display()))]
    async fn unmount(&self) -> VolumeResult<()> {
        unmount_remote(&self.mount_path, &self.options).await
    }

    async fn check_health(&self) -> VolumeResult<()> {
        check_remote(&self.mount_path, &self.options).await
    }
}
