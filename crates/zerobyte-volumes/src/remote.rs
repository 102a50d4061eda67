//! Shared mount flow for network filesystems

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info};

use crate::backend::MountOptions;
use crate::command::{force_unmount, is_mountpoint, MountCommand};
use crate::error::{VolumeError, VolumeResult};
use crate::probe::probe_directory;

/// Create the mount point and run `command` unless something is already mounted there
pub(crate) async fn mount_remote(
    mount_path: &Path,
    command: MountCommand,
    options: &MountOptions,
) -> VolumeResult<()> {
    // A stale mount at the path can block the stat calls, not just the helper
    let mounted = within(command.program(), options.mount_timeout, async {
        fs::create_dir_all(mount_path).await?;

        if is_mountpoint(mount_path).await? {
            debug!("{} is already a mount point", mount_path.display());
            return Ok(false);
        }

        command.run(options.mount_timeout).await?;
        Ok::<_, VolumeError>(true)
    })
    .await?;

    if mounted {
        info!("Mounted {} at {}", command.program(), mount_path.display());
    }
    Ok(())
}

async fn within<T, F>(helper: &str, timeout: Duration, operation: F) -> VolumeResult<T>
where
    F: Future<Output = VolumeResult<T>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| VolumeError::Timeout {
            helper: helper.to_string(),
            seconds: timeout.as_secs(),
        })?
}

pub(crate) async fn unmount_remote(mount_path: &Path, options: &MountOptions) -> VolumeResult<()> {
    force_unmount(mount_path, options.unmount_timeout).await?;
    info!("Unmounted {}", mount_path.display());
    Ok(())
}

/// The path must still be in the mount table and answer a directory probe
pub(crate) async fn check_remote(mount_path: &Path, options: &MountOptions) -> VolumeResult<()> {
    if !is_mountpoint(mount_path).await? {
        return Err(VolumeError::NotMounted);
    }
    probe_directory(mount_path, options.probe_timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stalled_mount_step_times_out() {
        let err = within("sshfs", Duration::from_millis(50), std::future::pending::<VolumeResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::Timeout { ref helper, .. } if helper == "sshfs"));
        assert_eq!(err.reason(), "timeout");
    }

    #[tokio::test]
    async fn test_completed_step_passes_through() {
        let value = within("mount", Duration::from_secs(1), async { Ok::<_, VolumeError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
