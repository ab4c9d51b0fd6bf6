//! Configuration for the mqttop daemon.

use std::str::FromStr;
use std::time::Duration;

use mqttop_bridge::{
    BridgeConfig, BridgeError, DiscoveryConfig, LoggingConfig, MetricError, MqttConfig,
    validate_mqtt,
};
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttopConfig {
    /// Broker connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Auto-discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hostname used in topics and discovery ids.
    /// Use "auto" to detect automatically (default).
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Report a metric offline after this many consecutive failed samples.
    /// Unset (default) only logs failures.
    #[serde(default)]
    pub offline_after_failures: Option<u32>,

    /// Per-metric settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_hostname() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

/// Settings shared by every metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Publish this metric (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sampling interval, e.g. `"5s"` or `"1m"` (default: 5s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Topic below the base topic. Defaults to `<hostname>/<metric>`.
    #[serde(default)]
    pub topic: Option<String>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            topic: None,
        }
    }
}

/// Which entities a multi-entity metric reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Every entity the system reports.
    All,
    /// Only entities passing the configured filters (default).
    #[default]
    Filtered,
}

impl FromStr for SelectionMode {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SelectionMode::All),
            "filtered" => Ok(SelectionMode::Filtered),
            other => Err(MetricError::SelectionMode(other.to_string())),
        }
    }
}

/// Per-metric configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub cpu: MetricConfig,

    #[serde(default)]
    pub memory: MetricConfig,

    #[serde(default)]
    pub disk: DiskConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub system: MetricConfig,
}

/// Network interface filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(flatten)]
    pub metric: MetricConfig,

    /// Only include these interfaces (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these interfaces.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Exclude loopback interfaces (default: true).
    #[serde(default = "default_true")]
    pub exclude_loopback: bool,

    /// Exclude virtual interfaces (docker, veth, etc.) (default: false).
    #[serde(default)]
    pub exclude_virtual: bool,

    /// Initial selection mode (default: filtered).
    #[serde(default)]
    pub selection_mode: SelectionMode,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            metric: MetricConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_loopback: true,
            exclude_virtual: false,
            selection_mode: SelectionMode::default(),
        }
    }
}

/// Disk mount filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(flatten)]
    pub metric: MetricConfig,

    /// Only include these mount points (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these mount points.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Exclude pseudo filesystems (tmpfs, devtmpfs, etc.) (default: true).
    #[serde(default = "default_true")]
    pub exclude_pseudo: bool,

    /// Initial selection mode (default: filtered).
    #[serde(default)]
    pub selection_mode: SelectionMode,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            metric: MetricConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_pseudo: true,
            selection_mode: SelectionMode::default(),
        }
    }
}

impl BridgeConfig for MqttopConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn offline_after_failures(&self) -> Option<u32> {
        self.offline_after_failures
    }

    fn validate(&self) -> mqttop_bridge::Result<()> {
        validate_mqtt(&self.mqtt)?;

        let metrics = &self.metrics;
        let all = [
            ("cpu", &metrics.cpu),
            ("memory", &metrics.memory),
            ("disk", &metrics.disk.metric),
            ("network", &metrics.network.metric),
            ("system", &metrics.system),
        ];

        for (name, metric) in all {
            if metric.enabled && metric.interval.is_zero() {
                return Err(BridgeError::validation(format!(
                    "metrics.{}.interval must be > 0",
                    name
                )));
            }
        }

        // At least one metric type should be enabled
        if !all.iter().any(|(_, metric)| metric.enabled) {
            return Err(BridgeError::validation(
                "At least one metric type must be enabled",
            ));
        }

        Ok(())
    }
}

impl MqttopConfig {
    /// Get the hostname to use, resolving "auto" if needed.
    pub fn get_hostname(&self) -> String {
        if self.hostname == "auto" {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            self.hostname.clone()
        }
    }
}

impl NetworkConfig {
    /// Check if an interface should be included.
    pub fn should_include(&self, name: &str) -> bool {
        // Check explicit include list
        if !self.include.is_empty() && !self.include.iter().any(|i| i == name) {
            return false;
        }

        // Check exclude list
        if self.exclude.iter().any(|e| e == name) {
            return false;
        }

        if self.exclude_loopback && name == "lo" {
            return false;
        }

        if self.exclude_virtual {
            let virtual_prefixes = ["docker", "veth", "br-", "virbr", "vnet"];
            if virtual_prefixes.iter().any(|p| name.starts_with(p)) {
                return false;
            }
        }

        true
    }
}

impl DiskConfig {
    /// Check if a mount point should be included.
    pub fn should_include(&self, mount_point: &str, fs_type: &str) -> bool {
        // Check explicit include list
        if !self.include.is_empty() && !self.include.iter().any(|i| i == mount_point) {
            return false;
        }

        // Check exclude list
        if self.exclude.iter().any(|e| e == mount_point) {
            return false;
        }

        if self.exclude_pseudo {
            let pseudo_types = [
                "tmpfs",
                "devtmpfs",
                "devfs",
                "sysfs",
                "proc",
                "cgroup",
                "cgroup2",
                "securityfs",
                "debugfs",
                "configfs",
                "fusectl",
                "hugetlbfs",
                "mqueue",
                "pstore",
                "binfmt_misc",
                "autofs",
                "overlay",
                "squashfs",
            ];
            if pseudo_types.contains(&fs_type) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: MqttopConfig = json5::from_str("{}").unwrap();
        config.validate().unwrap();

        assert_eq!(config.hostname, "auto");
        assert_eq!(config.mqtt.host, "localhost");
        assert!(config.discovery.enabled);
        assert_eq!(config.offline_after_failures, None);
        assert!(config.metrics.cpu.enabled);
        assert_eq!(config.metrics.memory.interval, Duration::from_secs(5));
        assert!(config.metrics.network.exclude_loopback);
        assert!(config.metrics.disk.exclude_pseudo);
        assert_eq!(config.metrics.disk.selection_mode, SelectionMode::Filtered);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            mqtt: {
                host: "broker.lan",
                base_topic: "metrics",
            },
            discovery: { enabled: false },
            hostname: "server01",
            offline_after_failures: 3,
            metrics: {
                cpu: { interval: "10s" },
                memory: { enabled: false },
                system: { interval: "1m", topic: "server01/sys" },
                network: {
                    interval: "2s",
                    exclude: ["docker0"],
                    exclude_loopback: true,
                    exclude_virtual: true,
                    selection_mode: "all",
                },
                disk: {
                    exclude: ["/boot"],
                    exclude_pseudo: true,
                },
            },
        }"#;

        let config: MqttopConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.get_hostname(), "server01");
        assert_eq!(config.offline_after_failures(), Some(3));
        assert!(!config.discovery.enabled);
        assert_eq!(config.metrics.cpu.interval, Duration::from_secs(10));
        assert!(!config.metrics.memory.enabled);
        assert_eq!(config.metrics.system.interval, Duration::from_secs(60));
        assert_eq!(config.metrics.system.topic.as_deref(), Some("server01/sys"));
        assert_eq!(config.metrics.network.metric.interval, Duration::from_secs(2));
        assert!(config.metrics.network.exclude_virtual);
        assert_eq!(config.metrics.network.selection_mode, SelectionMode::All);
        assert_eq!(config.metrics.disk.exclude, vec!["/boot".to_string()]);
    }

    #[test]
    fn test_validate_zero_interval() {
        let config: MqttopConfig =
            json5::from_str(r#"{ metrics: { cpu: { interval: "0s" } } }"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_no_metrics() {
        let json = r#"{
            metrics: {
                cpu: { enabled: false },
                memory: { enabled: false },
                disk: { enabled: false },
                network: { enabled: false },
                system: { enabled: false },
            }
        }"#;

        let config: MqttopConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_selection_mode_from_str() {
        assert_eq!("all".parse::<SelectionMode>().unwrap(), SelectionMode::All);
        assert_eq!(
            "filtered".parse::<SelectionMode>().unwrap(),
            SelectionMode::Filtered
        );
        assert!(matches!(
            "some".parse::<SelectionMode>(),
            Err(MetricError::SelectionMode(_))
        ));
    }

    #[test]
    fn test_network_filter() {
        let config = NetworkConfig {
            exclude: vec!["docker0".to_string()],
            exclude_virtual: true,
            ..Default::default()
        };

        assert!(config.should_include("eth0"));
        assert!(!config.should_include("lo"));
        assert!(!config.should_include("docker0"));
        assert!(!config.should_include("veth1234"));
    }

    #[test]
    fn test_network_include_list() {
        let config = NetworkConfig {
            include: vec!["eth0".to_string()],
            ..Default::default()
        };

        assert!(config.should_include("eth0"));
        assert!(!config.should_include("wlan0"));
    }

    #[test]
    fn test_disk_filter() {
        let config = DiskConfig {
            exclude: vec!["/boot".to_string()],
            ..Default::default()
        };

        assert!(config.should_include("/", "ext4"));
        assert!(config.should_include("/home", "xfs"));
        assert!(!config.should_include("/boot", "ext4"));
        assert!(!config.should_include("/run", "tmpfs"));
    }
}
