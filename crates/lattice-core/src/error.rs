//! Error types shared across the routing plane.

use thiserror::Error;

/// Errors from cluster capability operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The presence registry rejected or failed an operation.
    #[error("registry error: {0}")]
    Registry(String),

    /// The message broker rejected or failed an operation.
    #[error("broker error: {0}")]
    Broker(String),

    /// A bounded operation did not complete in time.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// The operation that was cut off.
        operation: &'static str,
        /// The bound that expired.
        seconds: u64,
    },

    /// The delivery stream or an internal channel is gone.
    #[error("delivery channel closed")]
    ChannelClosed,
}

impl ClusterError {
    /// Wraps a registry client error.
    pub fn registry(err: impl std::fmt::Display) -> Self {
        Self::Registry(err.to_string())
    }

    /// Wraps a broker client error.
    pub fn broker(err: impl std::fmt::Display) -> Self {
        Self::Broker(err.to_string())
    }
}

/// Result type for cluster capability operations.
pub type ClusterResult<T> = Result<T, ClusterError>;
