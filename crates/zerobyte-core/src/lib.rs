//! Core data structures for zerobyte
//!
//! Path canonicalization, snapshot dump planning and the volume, repository
//! and snapshot models shared by the backend and service crates.

pub mod ancestor;
pub mod dump;
pub mod error;
pub mod path;
pub mod repository;
pub mod snapshot;
pub mod volume;

pub use ancestor::find_common_ancestor;
pub use dump::{prepare_snapshot_dump, sanitize_filename_part, DumpPlan, PathKind};
pub use error::{Error, Result};
pub use path::{file_name, normalize_absolute_path, relative_path, ROOT};
pub use repository::{CompressionMode, Repository, RepositoryConfig, RepositoryStatus};
pub use snapshot::Snapshot;
pub use volume::{BackendConfig, BackendKind, BackendStatus, Volume};
