//! External mount helper invocation
//!
//! Helpers are run with a bounded wait. Secrets travel through stdin or the
//! environment, never through argv, so the `Display` form is safe to log.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{classify_failure, VolumeError, VolumeResult};

/// Kernel mount table
const MOUNTS_FILE: &str = "/proc/self/mounts";

/// A fully specified helper invocation
#[derive(Clone, PartialEq, Eq)]
pub struct MountCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
}

impl MountCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Data written to the helper's stdin (e.g. a password)
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Names of the environment variables passed to the helper
    pub fn env_keys(&self) -> Vec<&str> {
        self.env.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Run the helper, returning its stdout on success.
    ///
    /// Only the helper's own exit is bounded by `timeout`. Processes it leaves
    /// behind (the ssh transport of sshfs, for one) may keep the output pipes
    /// open, so output is collected for at most [`OUTPUT_GRACE`] after exit.
    pub async fn run(&self, timeout: Duration) -> VolumeResult<String> {
        debug!("Running {}", self);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VolumeError::HelperNotFound(self.program.clone())
            } else {
                VolumeError::Io(e)
            }
        })?;

        let stdout = child.stdout.take().map(OutputCollector::spawn);
        let stderr = child.stderr.take().map(OutputCollector::spawn);
        let input = self.stdin.clone();
        let stdin = child.stdin.take();

        let result = tokio::time::timeout(timeout, async {
            if let (Some(mut pipe), Some(data)) = (stdin, input) {
                pipe.write_all(data.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            child.wait().await
        })
        .await;

        let status = match result {
            Ok(status) => status?,
            Err(_) => {
                return Err(VolumeError::Timeout {
                    helper: self.program.clone(),
                    seconds: timeout.as_secs(),
                })
            }
        };

        let stdout = OutputCollector::finish(stdout).await;
        if status.success() {
            return Ok(stdout);
        }

        let stderr = OutputCollector::finish(stderr).await;
        let code = status.code().unwrap_or(-1);
        Err(classify_failure(&self.program, code, &stderr))
    }
}

/// Upper bound on waiting for output pipes to close once the helper exited
pub const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Drains one output pipe in the background
struct OutputCollector {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputCollector {
    fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buffer, task }
    }

    /// Whatever was read by the time the pipe closed or the grace period ran out
    async fn finish(collector: Option<Self>) -> String {
        let Some(mut collector) = collector else {
            return String::new();
        };
        let _ = tokio::time::timeout(OUTPUT_GRACE, &mut collector.task).await;
        let output = String::from_utf8_lossy(&collector.buffer.lock()).into_owned();
        output
    }
}

impl Drop for OutputCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Display for MountCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MountCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env_keys())
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Lazy unmount command for a mount point
pub fn unmount_command(mount_path: &Path) -> MountCommand {
    MountCommand::new("umount")
        .arg("-l")
        .arg(mount_path.to_string_lossy())
}

/// Run a forced unmount. A path that is not mounted counts as success.
pub async fn force_unmount(mount_path: &Path, timeout: Duration) -> VolumeResult<()> {
    match unmount_command(mount_path).run(timeout).await {
        Ok(_) => Ok(()),
        Err(VolumeError::MountFailed { message, .. }) if is_not_mounted_message(&message) => {
            debug!("{} was already detached", mount_path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_not_mounted_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not mounted")
        || lower.contains("no mount point specified")
        || lower.contains("mountpoint not found")
        || lower.contains("no such file or directory")
}

/// Decode the octal escapes used by the kernel in mount tables (`\040` etc.)
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let parsed = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = parsed {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Check whether `mount_path` is listed as a mount point in the kernel mount table
pub async fn is_mountpoint(mount_path: &Path) -> VolumeResult<bool> {
    let contents = tokio::fs::read_to_string(MOUNTS_FILE).await?;
    Ok(mount_table_contains(&contents, mount_path))
}

fn mount_table_contains(contents: &str, mount_path: &Path) -> bool {
    let wanted = mount_path.to_string_lossy();
    let wanted = wanted.trim_end_matches('/');
    contents.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|target| unescape_mount_field(target) == wanted)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success_returns_stdout() {
        let out = MountCommand::new("sh")
            .arg("-c")
            .arg("echo mounted")
            .run(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "mounted");
    }

    #[tokio::test]
    async fn test_run_failure_is_classified() {
        let err = MountCommand::new("sh")
            .arg("-c")
            .arg("echo 'mount error(13): Permission denied' >&2; exit 32")
            .run(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let err = MountCommand::new("sleep")
            .arg("5")
            .run(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_background_process_does_not_hold_up_exit() {
        let started = std::time::Instant::now();
        MountCommand::new("sh")
            .arg("-c")
            .arg("sleep 3 & exit 0")
            .run(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_failure_classified_while_pipes_stay_open() {
        let err = MountCommand::new("sh")
            .arg("-c")
            .arg("echo 'read: Connection reset by peer' >&2; sleep 3 & exit 1")
            .run(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::HostUnreachable(_)));
    }

    #[tokio::test]
    async fn test_missing_helper() {
        let err = MountCommand::new("zerobyte-no-such-helper")
            .run(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::HelperNotFound(_)));
    }

    #[tokio::test]
    async fn test_stdin_and_env_are_passed() {
        MountCommand::new("sh")
            .arg("-c")
            .arg(r#"read line; test "$line" = "secret" && test "$PASSWD" = "pw""#)
            .env("PASSWD", "pw")
            .stdin("secret\n")
            .run(Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[test]
    fn test_display_hides_secrets() {
        let cmd = MountCommand::new("sshfs")
            .arg("user@host:/data")
            .env("PASSWD", "pw")
            .stdin("secret\n");
        let shown = format!("{} {:?}", cmd, cmd);
        assert!(!shown.contains("secret"));
        assert!(!shown.contains("\"pw\""));
    }

    #[test]
    fn test_mount_table_parsing() {
        let table = "\
proc /proc proc rw,nosuid 0 0
//nas/backups /var/lib/zerobyte/volumes/a/_data cifs rw,vers=3.0 0 0
host:/export /mnt/with\\040space nfs4 rw 0 0
";
        assert!(mount_table_contains(table, Path::new("/var/lib/zerobyte/volumes/a/_data")));
        assert!(mount_table_contains(table, Path::new("/var/lib/zerobyte/volumes/a/_data/")));
        assert!(mount_table_contains(table, Path::new("/mnt/with space")));
        assert!(!mount_table_contains(table, Path::new("/var/lib/zerobyte/volumes/b/_data")));
    }

    #[test]
    fn test_not_mounted_messages() {
        assert!(is_not_mounted_message("umount: /mnt/x: not mounted."));
        assert!(!is_not_mounted_message("umount: /mnt/x: target is busy."));
    }
}
