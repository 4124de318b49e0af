use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// The kind of entity a lookup failed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Board,
    List,
    Card,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Board => write!(f, "Board"),
            Self::List => write!(f, "List"),
            Self::Card => write!(f, "Card"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(#[from] anyhow::Error),
}

impl SyncError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// NotFound and Validation rejections cannot be fixed by refetching
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Validation(_))
    }

    /// Whether the client should drop its view and refetch the board
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::Timeout(_) | Self::TransportError(_)
        )
    }

    /// HTTP status used by the API handlers
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Short machine-readable name used in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::StorageError(_) | Self::IoError(_) => "storage",
            Self::SerializationError(_) => "serialization",
            Self::ConfigError(_) => "config",
            Self::TransportError(_) => "transport",
        }
    }
}
