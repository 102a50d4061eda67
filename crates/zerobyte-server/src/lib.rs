//! Zerobyte backup management services
//!
//! Volume lifecycle, repository administration and snapshot dumps on top of
//! the restic backup engine, plus the daemon that keeps mounts healthy and
//! the catalog persisted.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod persistence;
pub mod repositories;
pub mod restic;
pub mod server;
pub mod validation;
pub mod volumes;

pub use cache::Cache;
pub use config::ServerConfig;
pub use context::RequestContext;
pub use engine::{BackupEngine, EngineError};
pub use error::{ApiError, ServiceError, ServiceResult};
pub use events::{ServerEvent, ServerEvents};
pub use repositories::{DumpResult, RepositoryService, SnapshotListing};
pub use server::{run_server, ServerState};
pub use volumes::VolumeService;
