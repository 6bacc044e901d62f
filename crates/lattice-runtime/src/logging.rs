//! Logging bootstrap.
//!
//! Thin builder over `tracing-subscriber`: a programmatic default level plus
//! per-module directives, overridable at the shell with `RUST_LOG`.
//!
//! ```rust,ignore
//! LoggingBuilder::new()
//!     .with_level(Level::DEBUG)
//!     .with_directive("lapin=warn")
//!     .init();
//! ```

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Builder for the process-wide tracing subscriber.
pub struct LoggingBuilder {
    level: Level,
    directives: Vec<String>,
}

impl LoggingBuilder {
    /// Starts from INFO with no extra directives.
    pub fn new() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
        }
    }

    /// Sets the default level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a module-level directive such as `"lapin=warn"`.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn filter_string(&self) -> String {
        let mut filter = self.level.to_string().to_lowercase();
        for directive in &self.directives {
            filter.push(',');
            filter.push_str(directive);
        }
        filter
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.filter_string()))
    }

    /// Installs the subscriber.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set.
    pub fn init(self) {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(self.env_filter())
            .init();
    }

    /// Installs the subscriber, returning an error instead of panicking when
    /// one is already set. Useful in tests.
    pub fn try_init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(self.env_filter())
            .try_init()?;
        Ok(())
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_combines_level_and_directives() {
        let builder = LoggingBuilder::new()
            .with_level(Level::DEBUG)
            .with_directive("lapin=warn")
            .with_directive("etcd_client=warn");
        assert_eq!(builder.filter_string(), "debug,lapin=warn,etcd_client=warn");
    }

    #[test]
    fn default_filter_is_info() {
        assert_eq!(LoggingBuilder::new().filter_string(), "info");
    }
}
