//! Error types for Sprocket

use thiserror::Error;
use uuid::Uuid;

use crate::issue::ParsedEngineError;

/// Core error type for Sprocket operations
#[derive(Error, Debug)]
pub enum SprocketError {
    /// The SQL failed a validation check before reaching the engine.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A duplicate name, a publish without a draft, or a concurrent
    /// operation that was explicitly rejected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The connection registry is at capacity and idle cleanup freed nothing.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The tenant database could not be reached or is unhealthy.
    #[error("Connection error for tenant {tenant_id}: {message}")]
    Connection { tenant_id: Uuid, message: String },

    /// A vendor error from the target engine, already normalized.
    #[error("Engine error: {0}")]
    Engine(ParsedEngineError),

    /// Metadata store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SprocketError {
    /// Build a connection error for a tenant.
    pub fn connection(tenant_id: Uuid, message: impl Into<String>) -> Self {
        Self::Connection {
            tenant_id,
            message: message.into(),
        }
    }

    /// The parsed engine error, if this is an engine failure.
    pub fn as_engine(&self) -> Option<&ParsedEngineError> {
        match self {
            Self::Engine(parsed) => Some(parsed),
            _ => None,
        }
    }
}

/// Result type alias for Sprocket operations
pub type Result<T> = std::result::Result<T, SprocketError>;
