//! SMB/CIFS backend

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;
use zerobyte_core::BackendKind;

use crate::backend::{MountOptions, VolumeBackend};
use crate::command::MountCommand;
use crate::error::VolumeResult;
use crate::remote::{check_remote, mount_remote, unmount_remote};

/// CIFS share mounted through mount.cifs
pub struct SmbBackend {
    server: String,
    share: String,
    username: String,
    password: String,
    vers: String,
    port: u16,
    domain: Option<String>,
    mount_path: PathBuf,
    options: MountOptions,
}

impl SmbBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server: &str,
        share: &str,
        username: &str,
        password: &str,
        vers: &str,
        port: u16,
        domain: Option<&str>,
        mount_path: impl AsRef<Path>,
        options: MountOptions,
    ) -> Self {
        Self {
            server: server.to_string(),
            share: share.trim_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            vers: vers.to_string(),
            port,
            domain: domain.map(|d| d.to_string()),
            mount_path: mount_path.as_ref().to_path_buf(),
            options,
        }
    }

    /// The mount invocation; credentials go through the USER/PASSWD
    /// environment variables understood by mount.cifs.
    pub fn mount_command(&self) -> MountCommand {
        let mut opts = vec![format!("vers={}", self.vers), format!("port={}", self.port)];
        if let Some(domain) = &self.domain {
            opts.push(format!("domain={}", domain));
        }

        MountCommand::new("mount")
            .arg("-t")
            .arg("cifs")
            .arg(format!("//{}/{}", self.server, self.share))
            .arg(self.mount_path.to_string_lossy())
            .arg("-o")
            .arg(opts.join(","))
            .env("USER", &self.username)
            .env("PASSWD", &self.password)
    }
}

#[async_trait]
impl VolumeBackend for SmbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Smb
    }

    fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    #[instrument(skip(self), fields(server = %self.server, share = %self.share))]
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_command() {
        let backend = SmbBackend::new(
            "smb-server",
            "/testshare/",
            "testuser",
            "testpass",
            "3.0",
            445,
            Some("WORKGROUP"),
            "/tmp/test-mount-smb",
            MountOptions::default(),
        );

        let cmd = backend.mount_command();
        assert_eq!(cmd.program(), "mount");
        assert_eq!(
            cmd.args(),
            [
                "-t",
                "cifs",
                "//smb-server/testshare",
                "/tmp/test-mount-smb",
                "-o",
                "vers=3.0,port=445,domain=WORKGROUP",
            ]
        );
        assert_eq!(cmd.env_keys(), ["USER", "PASSWD"]);
        assert!(!cmd.to_string().contains("testpass"));
    }
}
