//! restic driver

use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use zerobyte_core::Snapshot;

use crate::config::EngineConfig;
use crate::engine::{
    AbortHandle, BackupEngine, DumpCompletion, DumpOptions, DumpStream, EngineError, EngineResult,
    RepositoryStats, RepositoryTarget, SnapshotEntry,
};

/// [`BackupEngine`] backed by the restic command line
pub struct ResticEngine {
    config: EngineConfig,
}

impl ResticEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(&self, target: &RepositoryTarget, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .env("RESTIC_REPOSITORY", &target.location)
            .env("RESTIC_COMPRESSION", target.compression.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(file) = &self.config.password_file {
            cmd.env("RESTIC_PASSWORD_FILE", file);
        }
        if let Some(dir) = &self.config.cache_dir {
            cmd.env("RESTIC_CACHE_DIR", dir);
        }
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            binary: self.config.binary.clone(),
            source,
        }
    }

    /// Run to completion and return stdout
    async fn run(&self, target: &RepositoryTarget, args: &[&str]) -> EngineResult<String> {
        debug!("restic {}", args.join(" "));

        let output = self
            .command(target, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Keep only `node` records from `restic ls --json` output
fn parse_ls_output(output: &str) -> EngineResult<Vec<SnapshotEntry>> {
    let mut entries = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string()))?;

        let is_node = value
            .get("struct_type")
            .and_then(|t| t.as_str())
            .map(|t| t == "node")
            .unwrap_or(false);
        if !is_node {
            continue;
        }

        let entry: SnapshotEntry =
            serde_json::from_value(value).map_err(|e| EngineError::Parse(e.to_string()))?;
        entries.push(entry);
    }
    Ok(entries)
}

#[async_trait]
impl BackupEngine for ResticEngine {
    #[instrument(skip(self, target), fields(repository = %target.location))]
    async fn init(&self, target: &RepositoryTarget) -> EngineResult<()> {
        self.run(target, &["init"]).await?;
        info!("Initialized repository at {}", target.location);
        Ok(())
    }

    async fn snapshots(&self, target: &RepositoryTarget) -> EngineResult<Vec<Snapshot>> {
        let output = self.run(target, &["snapshots", "--json"]).await?;
        // restic prints `null` for an empty repository
        let snapshots: Option<Vec<Snapshot>> =
            serde_json::from_str(&output).map_err(|e| EngineError::Parse(e.to_string()))?;
        Ok(snapshots.unwrap_or_default())
    }

    async fn ls(
        &self,
        target: &RepositoryTarget,
        snapshot_ref: &str,
        path: &str,
    ) -> EngineResult<Vec<SnapshotEntry>> {
        let output = self.run(target, &["ls", "--json", snapshot_ref, path]).await?;
        parse_ls_output(&output)
    }

    async fn stats(&self, target: &RepositoryTarget) -> EngineResult<RepositoryStats> {
        let output = self
            .run(target, &["stats", "--mode", "raw-data", "--json"])
            .await?;
        serde_json::from_str(&output).map_err(|e| EngineError::Parse(e.to_string()))
    }

    #[instrument(skip(self, target), fields(repository = %target.location))]
    async fn check(&self, target: &RepositoryTarget) -> EngineResult<()> {
        self.run(target, &["check"]).await?;
        Ok(())
    }

    #[instrument(skip(self, target, options), fields(repository = %target.location, path = %options.path))]
    async fn dump(
        &self,
        target: &RepositoryTarget,
        snapshot_ref: &str,
        options: DumpOptions,
    ) -> EngineResult<DumpStream> {
        let mut args = vec!["dump"];
        if options.archive {
            args.extend(["--archive", "tar"]);
        }
        args.push(snapshot_ref);
        args.push(&options.path);

        debug!("restic {}", args.join(" "));

        let mut child = self
            .command(target, &args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("restic stdout not captured")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("restic stderr not captured")))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let (tx, rx) = oneshot::channel();
        let organization_id = options.organization_id.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill aborted dump: {}", e);
                    }
                    info!("Dump aborted for organization {}", organization_id);
                    Err(EngineError::Aborted)
                }
                status = child.wait() => match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => {
                        let stderr = stderr_task.await.unwrap_or_default();
                        Err(EngineError::Exit {
                            code: status.code().unwrap_or(-1),
                            stderr: stderr.trim().to_string(),
                        })
                    }
                    Err(e) => Err(EngineError::Io(e)),
                },
            };
            let _ = tx.send(result);
        });

        Ok(DumpStream {
            stream: ReaderStream::new(stdout).boxed(),
            completion: DumpCompletion::new(rx),
            abort: AbortHandle::new(token),
        })
    }
}
