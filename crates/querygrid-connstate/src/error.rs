//! Error types for the connection state registry.
//!
//! Unknown pool names are not errors; lookups return `Option`.

use thiserror::Error;

/// Result type alias for registry operations.
pub type ConnStateResult<T> = Result<T, ConnStateError>;

/// Errors that can occur in the connection state registry.
#[derive(Debug, Error)]
pub enum ConnStateError {
    #[error("failed to build connection pool {pool_name}: {source}")]
    PoolBuild {
        pool_name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to start housekeeper: {0}")]
    Housekeeper(#[source] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
