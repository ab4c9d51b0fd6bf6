//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{DiscoveryConfig, LoggingConfig, MqttConfig};

/// Trait for bridge configuration types.
///
/// Implement this for an application's configuration struct to get loading,
/// validation, and access to the sections the runner needs.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use mqttop_bridge::{BridgeConfig, DiscoveryConfig, LoggingConfig, MqttConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyConfig {
///     pub mqtt: MqttConfig,
///     pub discovery: DiscoveryConfig,
///     pub logging: LoggingConfig,
/// }
///
/// impl BridgeConfig for MyConfig {
///     fn mqtt(&self) -> &MqttConfig {
///         &self.mqtt
///     }
///
///     fn discovery(&self) -> &DiscoveryConfig {
///         &self.discovery
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Broker connection settings.
    fn mqtt(&self) -> &MqttConfig;

    /// Auto-discovery settings.
    fn discovery(&self) -> &DiscoveryConfig;

    /// Logging settings.
    fn logging(&self) -> &LoggingConfig;

    /// Consecutive failures after which a metric is reported offline.
    fn offline_after_failures(&self) -> Option<u32> {
        None
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading. The default checks the broker
    /// section; override and call [`validate_mqtt`] to keep those checks.
    fn validate(&self) -> Result<()> {
        validate_mqtt(self.mqtt())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }
}

/// Checks shared by every bridge configuration.
pub fn validate_mqtt(mqtt: &MqttConfig) -> Result<()> {
    if mqtt.host.trim().is_empty() {
        return Err(BridgeError::validation("mqtt.host must not be empty"));
    }
    if mqtt.port == 0 {
        return Err(BridgeError::validation("mqtt.port must not be 0"));
    }
    if mqtt.base_topic.trim_matches('/').is_empty() {
        return Err(BridgeError::validation("mqtt.base_topic must not be empty"));
    }
    if mqtt.base_topic.contains(['+', '#']) {
        return Err(BridgeError::validation(
            "mqtt.base_topic must not contain wildcards",
        ));
    }
    if mqtt.password.is_some() && mqtt.username.is_none() {
        return Err(BridgeError::validation(
            "mqtt.password requires mqtt.username",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        mqtt: MqttConfig,
        #[serde(default)]
        discovery: DiscoveryConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn mqtt(&self) -> &MqttConfig {
            &self.mqtt
        }

        fn discovery(&self) -> &DiscoveryConfig {
            &self.discovery
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("mqttop-{}-{}.json5", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_load_valid_config() {
        let path = write_config("valid", r#"{ mqtt: { host: "broker.lan" } }"#);
        let config = TestConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.mqtt().host, "broker.lan");
        assert!(config.discovery().enabled);
        assert_eq!(config.offline_after_failures(), None);
    }

    #[test]
    fn test_load_parse_error() {
        let path = write_config("broken", "{ mqtt: ");
        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_validation() {
        let mut mqtt = MqttConfig::default();
        assert!(validate_mqtt(&mqtt).is_ok());

        mqtt.base_topic = "metrics/#".to_string();
        assert!(matches!(
            validate_mqtt(&mqtt),
            Err(BridgeError::ConfigValidation(_))
        ));

        mqtt.base_topic = "metrics".to_string();
        mqtt.password = Some("secret".to_string());
        assert!(validate_mqtt(&mqtt).is_err());

        mqtt.username = Some("bridge".to_string());
        assert!(validate_mqtt(&mqtt).is_ok());

        mqtt.host = " ".to_string();
        assert!(validate_mqtt(&mqtt).is_err());
    }
}
