//! Error types for zerobyte-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Requested path is outside the snapshot base path")]
    PathOutsideSnapshot { requested: String, base: String },

    #[error("Snapshot {0} has no recorded paths")]
    EmptySnapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
