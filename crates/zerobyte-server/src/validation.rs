//! Input validation for administrative calls

use lazy_static::lazy_static;
use regex::Regex;
use zerobyte_core::BackendConfig;

use crate::error::{ServiceError, ServiceResult};

lazy_static! {
    /// Volume and repository display names
    static ref NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9 ._-]{0,127}$").unwrap();

    /// DNS name or IPv4 address
    static ref HOSTNAME_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,62})(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,62}))*$"
    ).unwrap();

    /// Bracket-less IPv6 literal
    static ref IPV6_RE: Regex = Regex::new(r"^[0-9a-fA-F:]{2,39}$").unwrap();

    /// SMB share name: no path separators or reserved characters
    static ref SHARE_RE: Regex = Regex::new(r#"^[^\\/:*?"<>|\x00-\x1f]{1,80}$"#).unwrap();

    /// Username for network filesystems
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9._@\\-]{1,64}$").unwrap();
}

/// Validate a volume or repository name
pub fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::bad_request("Name cannot be empty"));
    }
    if !NAME_RE.is_match(name) {
        return Err(ServiceError::bad_request(
            "Invalid name: must be 1-128 alphanumeric characters, spaces, dots, underscores, or hyphens",
        ));
    }
    Ok(())
}

pub fn validate_hostname(host: &str) -> ServiceResult<()> {
    if host.len() > 253 || !(HOSTNAME_RE.is_match(host) || IPV6_RE.is_match(host)) {
        return Err(ServiceError::bad_request(format!("Invalid hostname: {}", host)));
    }
    Ok(())
}

pub fn validate_share_name(share: &str) -> ServiceResult<()> {
    let share = share.trim_matches('/');
    if !SHARE_RE.is_match(share) {
        return Err(ServiceError::bad_request(format!("Invalid share name: {}", share)));
    }
    Ok(())
}

fn validate_username(username: &str) -> ServiceResult<()> {
    if !USERNAME_RE.is_match(username) {
        return Err(ServiceError::bad_request("Invalid username"));
    }
    Ok(())
}

/// Check required fields, then the shape of hosts, shares and usernames
pub fn validate_backend_config(config: &BackendConfig) -> ServiceResult<()> {
    config.validate()?;

    match config {
        BackendConfig::Local { path } => {
            if path.split('/').any(|segment| segment == "..") {
                return Err(ServiceError::bad_request("Local volume path cannot contain '..'"));
            }
        }
        BackendConfig::Sftp { host, username, .. } => {
            validate_hostname(host)?;
            validate_username(username)?;
        }
        BackendConfig::Smb {
            server,
            share,
            username,
            ..
        } => {
            validate_hostname(server)?;
            validate_share_name(share)?;
            validate_username(username)?;
        }
        BackendConfig::Nfs { server, .. } => {
            validate_hostname(server)?;
        }
    }
    Ok(())
}
