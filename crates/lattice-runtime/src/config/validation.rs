//! Configuration validation.

use lattice_core::GatewayConfig;

use super::error::{ConfigError, ConfigResult};

/// Checks a loaded configuration for values the gateway cannot start with.
pub fn validate_config(config: &GatewayConfig) -> ConfigResult<()> {
    if config.host.is_empty() {
        return Err(ConfigError::missing_field("Host"));
    }
    if config.port.is_empty() {
        return Err(ConfigError::missing_field("Port"));
    }
    if config.pong_time <= 0 {
        return Err(ConfigError::validation(format!(
            "PongTime must be positive, got {}",
            config.pong_time
        )));
    }
    if config.etcd.hosts.is_empty() {
        return Err(ConfigError::missing_field("Etcd.Hosts"));
    }
    if config.etcd.hosts.iter().any(|host| host.is_empty()) {
        return Err(ConfigError::validation("Etcd.Hosts contains an empty endpoint"));
    }
    if config.rabbitmq.mq_url.is_empty() {
        return Err(ConfigError::missing_field("RabbitMQ.MQUrl"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = GatewayConfig {
            host: String::new(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn nonpositive_pong_time_is_rejected() {
        let config = GatewayConfig {
            pong_time: -1,
            ..GatewayConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn missing_registry_endpoints_are_rejected() {
        let mut config = GatewayConfig::default();
        config.etcd.hosts.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_broker_url_is_rejected() {
        let mut config = GatewayConfig::default();
        config.rabbitmq.mq_url.clear();
        assert!(validate_config(&config).is_err());
    }
}
