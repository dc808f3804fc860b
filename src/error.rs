//! Error types for the Botgate services.

use thiserror::Error;

/// Main error type for Botgate operations.
#[derive(Error, Debug)]
pub enum BotgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key-value store errors
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The store script returned a reply outside its contract
    #[error("Unexpected script reply: {0}")]
    ScriptReply(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// Server setup errors
    #[error("Server setup error: {0}")]
    Setup(String),
}

/// Result type alias for Botgate operations.
pub type Result<T> = std::result::Result<T, BotgateError>;
