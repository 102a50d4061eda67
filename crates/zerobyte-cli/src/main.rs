use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zerobyte_core::{normalize_absolute_path, prepare_snapshot_dump, PathKind};
use zerobyte_server::{RequestContext, ServerConfig, ServerState};

#[derive(Parser)]
#[command(name = "zerobyte", version, about = "Zerobyte operator CLI")]
struct Cli {
    /// Organization to act on (defaults to the configured one)
    #[arg(long, env = "ZEROBYTE_ORGANIZATION")]
    org: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize a user-supplied path
    Normalize { path: String },
    /// Show how a snapshot path maps onto an engine dump
    Plan(PlanArgs),
    Volumes {
        #[command(subcommand)]
        command: VolumeCommand,
    },
    Repos {
        #[command(subcommand)]
        command: RepoCommand,
    },
    /// Stream a snapshot, or part of it, to a file or stdout
    Dump(DumpArgs),
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long)]
    snapshot_id: String,
    /// Paths recorded by the snapshot
    #[arg(long, num_args = 1.., required = true)]
    paths: Vec<String>,
    /// Requested path
    #[arg(long)]
    path: Option<String>,
}

#[derive(Subcommand)]
enum VolumeCommand {
    List,
    Health { id: String },
}

#[derive(Subcommand)]
enum RepoCommand {
    List,
    Snapshots { id: String },
    Ls(LsArgs),
}

#[derive(Args)]
struct LsArgs {
    repository: String,
    snapshot: String,
    #[arg(long)]
    path: Option<String>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Args)]
struct DumpArgs {
    repository: String,
    snapshot: String,
    #[arg(long)]
    path: Option<String>,
    /// Whether `--path` names a file or a directory
    #[arg(long, value_name = "file|dir")]
    kind: Option<PathKind>,
    /// Output file (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so dumps can be piped
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Normalize { path } => println!("{}", normalize_absolute_path(Some(&path))),
        Command::Plan(args) => {
            let plan = prepare_snapshot_dump(&args.snapshot_id, &args.paths, args.path.as_deref())?;
            print_json(&plan)?;
        }
        command => {
            let config = ServerConfig::from_env()?;
            let org = cli
                .org
                .unwrap_or_else(|| config.default_organization.clone());
            let state = ServerState::from_config(config).await?;
            let ctx = RequestContext::new(&org);
            run_with_state(&state, &ctx, command).await?;
        }
    }

    Ok(())
}

/// Runs against the daemon's state file read-only: mounts the daemon holds
/// are adopted in place and nothing is written back.
async fn run_with_state(state: &ServerState, ctx: &RequestContext, command: Command) -> Result<()> {
    state.volumes.attach_existing().await;
    match command {
        Command::Volumes { command } => {
            match command {
                VolumeCommand::List => print_json(&state.volumes.list_volumes(ctx).await)?,
                VolumeCommand::Health { id } => {
                    print_json(&state.volumes.check_health(ctx, &id).await?)?
                }
            }
        }
        Command::Repos { command } => {
            match command {
                RepoCommand::List => print_json(&state.repositories.list_repositories(ctx).await)?,
                RepoCommand::Snapshots { id } => {
                    print_json(&state.repositories.list_snapshots(ctx, &id).await?)?
                }
                RepoCommand::Ls(args) => {
                    let listing = state
                        .repositories
                        .list_snapshot_files(
                            ctx,
                            &args.repository,
                            &args.snapshot,
                            args.path.as_deref(),
                            args.offset,
                            args.limit,
                        )
                        .await?;
                    print_json(&listing)?;
                }
            }
        }
        Command::Dump(args) => dump(state, ctx, args).await?,
        Command::Normalize { .. } | Command::Plan(_) => {
            return Err(anyhow!("command does not need server state"))
        }
    }
    Ok(())
}

async fn dump(state: &ServerState, ctx: &RequestContext, args: DumpArgs) -> Result<()> {
    let mut result = state
        .repositories
        .dump_snapshot(ctx, &args.repository, &args.snapshot, args.path.as_deref(), args.kind)
        .await?;

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    loop {
        tokio::select! {
            chunk = result.stream.next() => match chunk {
                Some(chunk) => writer.write_all(&chunk?).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                result.abort.abort();
                return Err(anyhow!("Dump interrupted"));
            }
        }
    }
    writer.flush().await?;

    result.completion.await?;
    if args.output.is_some() {
        eprintln!("Wrote {} ({})", result.filename, result.content_type);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
