//! Error types for the LaneGate environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Actuator link could not be established
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Write to an established actuator link failed
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Operation attempted without an established link
    #[error("Actuator link is down")]
    LinkDown,

    /// Log replication attempt failed
    #[error("Replication error: {0}")]
    ReplicationError(String),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a connect error.
    pub fn connect(endpoint: impl std::fmt::Display) -> Self {
        Self::ConnectFailed(endpoint.to_string())
    }

    /// Creates a replication error.
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::ReplicationError(msg.into())
    }
}

impl From<std::io::Error> for EnvError {
    fn from(e: std::io::Error) -> Self {
        Self::TransportError(e.to_string())
    }
}
