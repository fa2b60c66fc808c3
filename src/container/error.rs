//! Container engine error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur while driving the container engine.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The engine command exited non-zero.
    #[error("engine command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },

    /// The engine command did not complete within the configured bound.
    #[error("engine command timed out: {command}")]
    Timeout { command: String },

    /// The identity cannot be embedded in a container name.
    #[error("invalid sandbox identity: {0:?}")]
    InvalidIdentity(String),

    /// Generic IO error launching the engine binary.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
