//! Volume error types

use thiserror::Error;

/// Volume backend error type
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("{helper} timed out after {seconds}s")]
    Timeout { helper: String, seconds: u64 },

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Mount helper not found: {0}")]
    HelperNotFound(String),

    #[error("{helper} exited with status {code}: {message}")]
    MountFailed {
        helper: String,
        code: i32,
        message: String,
    },

    #[error("Volume is not mounted")]
    NotMounted,

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Health probe failed: {0}")]
    Probe(String),

    #[error("Volume is in use: {0}")]
    InUse(String),

    #[error("Volume not registered: {0}")]
    NotRegistered(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VolumeError {
    /// Short machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            VolumeError::Timeout { .. } => "timeout",
            VolumeError::HostUnreachable(_) => "host_unreachable",
            VolumeError::AuthenticationFailed(_) => "authentication_failed",
            VolumeError::PermissionDenied(_) => "permission_denied",
            VolumeError::HelperNotFound(_) => "helper_not_found",
            VolumeError::MountFailed { .. } => "mount_failed",
            VolumeError::NotMounted => "not_mounted",
            VolumeError::PathNotFound(_) => "path_not_found",
            VolumeError::Probe(_) => "probe_failed",
            VolumeError::InUse(_) => "in_use",
            VolumeError::NotRegistered(_) => "not_registered",
            VolumeError::Config(_) => "invalid_config",
            VolumeError::Io(_) => "io",
        }
    }
}

impl From<zerobyte_core::Error> for VolumeError {
    fn from(err: zerobyte_core::Error) -> Self {
        VolumeError::Config(err.to_string())
    }
}

const AUTH_MARKERS: &[&str] = &[
    "mount error(13)",
    "logon failure",
    "nt_status_logon_failure",
    "authentication failed",
    "permission denied (publickey",
    "permission denied (password",
    "too many authentication failures",
    "access denied by server",
];

const UNREACHABLE_MARKERS: &[&str] = &[
    "mount error(112)",
    "mount error(113)",
    "mount error(115)",
    "no route to host",
    "connection refused",
    "connection timed out",
    "connection reset",
    "network is unreachable",
    "host is down",
    "could not resolve",
    "name or service not known",
    "temporary failure in name resolution",
    "read: connection reset by peer",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "only root can",
];

/// Classify a failed helper invocation from its exit code and stderr.
pub fn classify_failure(helper: &str, code: i32, stderr: &str) -> VolumeError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        return VolumeError::AuthenticationFailed(message);
    }
    if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return VolumeError::HostUnreachable(message);
    }
    if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        return VolumeError::PermissionDenied(message);
    }

    VolumeError::MountFailed {
        helper: helper.to_string(),
        code,
        message,
    }
}

/// Result type alias
pub type VolumeResult<T> = Result<T, VolumeError>;
