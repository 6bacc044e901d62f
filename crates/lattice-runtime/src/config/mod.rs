//! Configuration loading for the gateway runtime.
//!
//! The schema itself lives in `lattice_core::config` so the engine can carry
//! it; this module owns reading it off disk and validating it.

pub mod error;
pub mod loader;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config_from_file};
pub use validation::validate_config;
