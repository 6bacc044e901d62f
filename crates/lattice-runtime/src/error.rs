//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use lattice_core::ClusterError;

/// Errors that abort gateway startup or shutdown.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A cluster dependency (registry or broker) could not be initialized.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The HTTP listener failed to bind or serve.
    #[error("listener error: {0}")]
    Listener(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
