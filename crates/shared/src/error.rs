//! Error types for Campus

use thiserror::Error;

/// Failure reported by the identity backend or the role table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User '{email}' is already registered")]
    UserAlreadyExists { email: String },

    #[error("Invalid email address '{email}'")]
    InvalidEmail { email: String },

    #[error("Password should be at least {min_length} characters")]
    WeakPassword { min_length: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    /// A request was issued from inside the backend's own notification callback
    #[error("Request '{operation}' issued from within a session-change callback")]
    Reentrant { operation: String },

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether the failure is worth retrying (transport level, not a rejection)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Reentrant { .. })
    }
}

/// General Campus error type
#[derive(Debug, Error)]
pub enum CampusError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CampusError>;
