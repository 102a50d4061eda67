//! Service error types

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zerobyte_volumes::VolumeError;

use crate::engine::EngineError;

/// Errors surfaced by the repository and volume services
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Backup engine error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] zerobyte_core::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    /// HTTP-style status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Core(zerobyte_core::Error::EmptySnapshot(_)) => 404,
            ServiceError::Core(zerobyte_core::Error::Json(_)) => 500,
            ServiceError::Core(_) => 400,
            ServiceError::Volume(VolumeError::NotRegistered(_)) => 404,
            ServiceError::Volume(VolumeError::Config(_)) => 400,
            ServiceError::Volume(VolumeError::Timeout { .. }) => 504,
            ServiceError::Volume(VolumeError::InUse(_)) => 409,
            ServiceError::Volume(_) => 502,
            ServiceError::Engine(_) => 500,
            ServiceError::Persistence(_) => 500,
        }
    }
}

/// Result type alias
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error body returned to API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error message
    pub message: String,
    /// HTTP status code
    #[serde(skip)]
    pub status: u16,
}

impl ApiError {
    pub fn new(status: u16, message: &str) -> Self {
        Self {
            message: message.to_string(),
            status,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(404, message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(500, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::new(err.status_code(), &err.to_string())
    }
}
