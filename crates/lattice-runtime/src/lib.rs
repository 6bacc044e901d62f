//! # Lattice Runtime
//!
//! Orchestration layer for the Lattice gateway:
//!
//! - YAML configuration loading and validation (`config`)
//! - Logging bootstrap over `tracing-subscriber` (`logging`)
//! - Process wiring and graceful shutdown (`runtime`)
//!
//! ```ignore
//! use lattice_runtime::{GatewayRuntime, LoggingBuilder, load_config_from_file};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     LoggingBuilder::new().init();
//!     let config = load_config_from_file("etc/webSocketService.yaml")?;
//!     GatewayRuntime::init(config).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, load_config_from_file, validate_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::GatewayRuntime;

// Re-export tracing for use by binaries built on this crate.
pub use tracing;
