//! Configuration file loader.

use std::path::Path;

use tracing::{debug, info};

use lattice_core::GatewayConfig;

use super::error::{ConfigError, ConfigResult};
use super::validation::validate_config;

/// Loads gateway configuration from YAML, expanding environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<GatewayConfig> {
        let path = path.as_ref();
        info!("loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        self.load_from_str(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn load_from_str(&self, yaml: &str) -> ConfigResult<GatewayConfig> {
        let expanded = self.expand_env_vars(yaml);
        let config: GatewayConfig = serde_yaml::from_str(&expanded)?;
        validate_config(&config)?;
        debug!(
            instance = %config.instance_address(),
            jwt = config.jwt_enabled(),
            "configuration loaded",
        );
        Ok(config)
    }

    /// Expands environment variables in the format ${VAR_NAME} or
    /// ${VAR_NAME:-default}.
    fn expand_env_vars(&self, content: &str) -> String {
        let mut result = content.to_string();
        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]*))?\}").unwrap();

        for cap in re.captures_iter(content) {
            let full_match = cap.get(0).unwrap().as_str();
            let var_name = cap.get(1).unwrap().as_str();
            let default_value = cap.get(3).map(|m| m.as_str());

            let value = std::env::var(var_name)
                .ok()
                .or_else(|| default_value.map(String::from))
                .unwrap_or_default();

            result = result.replace(full_match, &value);
        }

        result
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to load configuration from a specific file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().load_from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_yaml_yields_defaults() {
        let loader = ConfigLoader::new();
        let config = loader.load_from_str("").unwrap();
        assert_eq!(config.port, ":8080");
        assert_eq!(config.pong_time, 60);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
Host: 10.0.0.3
Port: ":9000"
PongTime: 30
Etcd:
  Hosts: ["etcd-a:2379", "etcd-b:2379"]
RabbitMQ:
  MQUrl: "amqp://user:pass@mq:5672/%2f"
JWT:
  AccessSecret: "s3cret"
  AccessExpire: 7200
"#;
        let config = ConfigLoader::new().load_from_str(yaml).unwrap();
        assert_eq!(config.instance_address(), "10.0.0.3:9000");
        assert_eq!(config.pong_time, 30);
        assert_eq!(config.etcd.hosts.len(), 2);
        assert_eq!(config.rabbitmq.mq_url, "amqp://user:pass@mq:5672/%2f");
        assert!(config.jwt_enabled());
        assert_eq!(config.jwt.access_expire, 7200);
    }

    #[test]
    fn env_var_default_value() {
        let yaml = r#"
Host: ${LATTICE_TEST_NONEXISTENT_HOST:-10.1.1.1}
"#;
        let config = ConfigLoader::new().load_from_str(yaml).unwrap();
        assert_eq!(config.host, "10.1.1.1");
    }

    #[test]
    fn env_var_expansion() {
        // SAFETY: This test runs in single-threaded context
        unsafe { std::env::set_var("LATTICE_TEST_HOST", "10.2.2.2") };
        let yaml = "Host: ${LATTICE_TEST_HOST}\n";
        let config = ConfigLoader::new().load_from_str(yaml).unwrap();
        assert_eq!(config.host, "10.2.2.2");
        // SAFETY: This test runs in single-threaded context
        unsafe { std::env::remove_var("LATTICE_TEST_HOST") };
    }

    #[test]
    fn invalid_config_is_rejected() {
        let yaml = "PongTime: 0\n";
        assert!(matches!(
            ConfigLoader::new().load_from_str(yaml),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            load_config_from_file("/nonexistent/lattice.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
