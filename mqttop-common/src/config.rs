use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::topic::BASE_TOPIC;

/// MQTT delivery guarantee.
///
/// Serialized as the numeric level (`0`, `1`, `2`) so configs read like
/// every other MQTT tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::QoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Last-will message registered with the broker at connect time.
///
/// The bridge also publishes this payload itself on graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastWillConfig {
    /// Will topic. Empty means `<base_topic>/bridge/state`.
    #[serde(default)]
    pub topic: String,

    /// Will payload (default: `{}`, i.e. no metric alive).
    #[serde(default = "default_will_payload")]
    pub payload: String,

    /// Will QoS (default: 1).
    #[serde(default = "default_will_qos")]
    pub qos: QoS,

    /// Retain the will message (default: true).
    #[serde(default = "default_true")]
    pub retained: bool,
}

fn default_will_payload() -> String {
    "{}".to_string()
}

fn default_will_qos() -> QoS {
    QoS::AtLeastOnce
}

fn default_true() -> bool {
    true
}

impl Default for LastWillConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            payload: default_will_payload(),
            qos: default_will_qos(),
            retained: true,
        }
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier. Empty means `mqttop-<hostname>`.
    #[serde(default)]
    pub client_id: String,

    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password (only used together with `username`).
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Base topic prefix (default: "mqttop").
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Last-will settings.
    #[serde(default)]
    pub last_will: LastWillConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_base_topic() -> String {
    BASE_TOPIC.to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            base_topic: default_base_topic(),
            last_will: LastWillConfig::default(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Configured client id, or `mqttop-<hostname>` when empty.
    pub fn client_id_for(&self, hostname: &str) -> String {
        if self.client_id.is_empty() {
            format!("mqttop-{}", hostname)
        } else {
            self.client_id.clone()
        }
    }

    /// Configured will topic, or `<base_topic>/bridge/state` when empty.
    pub fn will_topic(&self) -> String {
        if self.last_will.topic.is_empty() {
            crate::topic::TopicBuilder::new(self.base_topic.as_str()).bridge_state()
        } else {
            self.last_will.topic.clone()
        }
    }
}

/// Auto-discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Publish discovery documents (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Discovery topic prefix (default: "homeassistant").
    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,

    /// QoS for discovery publishes (default: 1).
    #[serde(default = "default_will_qos")]
    pub qos: QoS,

    /// Delay between the discovery echo and the first forced refresh.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_settle_delay() -> u64 {
    1000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_discovery_prefix(),
            qos: default_will_qos(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        mqtt: MqttConfig,
        #[serde(default)]
        discovery: DiscoveryConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_parse_mqtt_config() {
        let json5 = r#"
        {
            mqtt: {
                host: "broker.lan",
                port: 8883,
                username: "bridge",
                password: "secret",
                base_topic: "metrics",
                last_will: { qos: 2, retained: false },
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: TestConfig = parse_config(json5).unwrap();

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(config.mqtt.base_topic, "metrics");
        assert_eq!(config.mqtt.last_will.qos, QoS::ExactlyOnce);
        assert!(!config.mqtt.last_will.retained);
        assert_eq!(config.mqtt.last_will.payload, "{}");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_config() {
        let config: TestConfig = parse_config("{}").unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.base_topic, "mqttop");
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));
        assert!(config.mqtt.last_will.topic.is_empty());
        assert!(config.mqtt.last_will.retained);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.prefix, "homeassistant");
        assert_eq!(config.discovery.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_resolved_identity() {
        let mut mqtt = MqttConfig::default();
        assert_eq!(mqtt.client_id_for("host1"), "mqttop-host1");
        assert_eq!(mqtt.will_topic(), "mqttop/bridge/state");

        mqtt.client_id = "custom".to_string();
        mqtt.base_topic = "metrics/".to_string();
        assert_eq!(mqtt.client_id_for("host1"), "custom");
        assert_eq!(mqtt.will_topic(), "metrics/bridge/state");

        mqtt.last_will.topic = "status/host1".to_string();
        assert_eq!(mqtt.will_topic(), "status/host1");
    }

    #[test]
    fn test_invalid_qos() {
        let result: Result<TestConfig> = parse_config("{ discovery: { qos: 3 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_logging_format() {
        let config: TestConfig =
            parse_config(r#"{ logging: { level: "warn", format: "json" } }"#).unwrap();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
