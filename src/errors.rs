//! Crate-level error taxonomy for fallible *setup* paths: loading
//! configuration, opening a relational backend, serializing arguments
//! outside of a wrapped call. Distinct from the four wrapper-raised error
//! kinds in `wrapper.rs`, which are the only errors the wrapper itself
//! introduces into a wrapped call's result.

use crate::persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("persistence backend error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl RecoveryError {
    /// HTTP-style status-code hint for callers that embed this crate behind
    /// a web boundary.
    pub fn to_status_code(&self) -> u16 {
        match self {
            RecoveryError::Configuration(_) | RecoveryError::InvalidConfig { .. } => 400,
            RecoveryError::Serialization(_) => 422,
            RecoveryError::Persistence(_) => 503,
        }
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
