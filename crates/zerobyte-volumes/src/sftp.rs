//! SFTP backend (sshfs)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;
use zerobyte_core::BackendKind;

use crate::backend::{MountOptions, VolumeBackend};
use crate::command::MountCommand;
use crate::error::VolumeResult;
use crate::remote::{check_remote, mount_remote, unmount_remote};

/// Remote directory mounted over SSH
pub struct SftpBackend {
    host: String,
    username: String,
    password: String,
    remote_path: String,
    port: u16,
    skip_host_key_check: bool,
    mount_path: PathBuf,
    options: MountOptions,
}

impl SftpBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        remote_path: &str,
        port: u16,
        skip_host_key_check: bool,
        mount_path: impl AsRef<Path>,
        options: MountOptions,
    ) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            remote_path: remote_path.to_string(),
            port,
            skip_host_key_check,
            mount_path: mount_path.as_ref().to_path_buf(),
            options,
        }
    }

    /// The sshfs invocation for this configuration
    pub fn mount_command(&self) -> MountCommand {
        let mut opts = vec![
            "reconnect".to_string(),
            "ServerAliveInterval=15".to_string(),
            "ServerAliveCountMax=3".to_string(),
            format!("ConnectTimeout={}", self.options.mount_timeout.as_secs().max(1)),
        ];

        if self.skip_host_key_check {
            opts.push("StrictHostKeyChecking=no".to_string());
            opts.push("UserKnownHostsFile=/dev/null".to_string());
        } else {
            // Fail instead of prompting for unknown keys
            opts.push("StrictHostKeyChecking=yes".to_string());
        }

        if self.password.is_empty() {
            opts.push("BatchMode=yes".to_string());
        } else {
            opts.push("password_stdin".to_string());
        }

        let remote = format!("{}@{}:{}", self.username, self.host, self.remote_path);
        let cmd = MountCommand::new("sshfs")
            .arg(remote)
            .arg(self.mount_path.to_string_lossy())
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg(opts.join(","));

        if self.password.is_empty() {
            cmd
        } else {
            cmd.stdin(format!("{}\n", self.password))
        }
    }
}

#[async_trait]
impl VolumeBackend for SftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sftp
    }

    fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    #[instrument(skip(self), fields(host = %self.host, mount_path = %self.mount_path.display()))]
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
