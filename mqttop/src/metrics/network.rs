//! Per interface traffic counters and rates.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use mqttop_bridge::{Discovery, MetricError};
use serde::Serialize;
use sysinfo::Networks;

use super::{round1, sanitize_key, sensor};
use crate::config::{NetworkConfig, SelectionMode};
use crate::producer::Sampler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceUsage {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Bytes per second since the previous sample; zero on the first one.
    pub rx_rate: f64,
    pub tx_rate: f64,
}

/// Interface usage keyed by sanitized interface name.
pub type NetworkSample = BTreeMap<String, InterfaceUsage>;

pub struct NetworkSampler {
    networks: Networks,
    config: NetworkConfig,
    mode: SelectionMode,
    /// Previous totals for calculating rates.
    previous: HashMap<String, (u64, u64)>,
    last: Option<Instant>,
}

impl NetworkSampler {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            mode: config.selection_mode,
            config,
            previous: HashMap::new(),
            last: None,
        }
    }

    fn selected(&self, name: &str) -> bool {
        match self.mode {
            SelectionMode::All => true,
            SelectionMode::Filtered => self.config.should_include(name),
        }
    }
}

/// Rate between two counter readings; counter resets yield zero.
fn rate(previous: Option<u64>, current: u64, elapsed: f64) -> f64 {
    match previous {
        Some(previous) if elapsed > 0.0 => round1(current.saturating_sub(previous) as f64 / elapsed),
        _ => 0.0,
    }
}

impl Sampler for NetworkSampler {
    type Sample = NetworkSample;

    fn kind(&self) -> &'static str {
        "network"
    }

    fn sample(&mut self) -> Result<NetworkSample, MetricError> {
        self.networks.refresh(true);

        let now = Instant::now();
        let elapsed = self
            .last
            .map_or(0.0, |last| now.duration_since(last).as_secs_f64());
        self.last = Some(now);

        let mut sample = NetworkSample::new();
        let mut current = HashMap::new();
        for (name, data) in self.networks.list() {
            if !self.selected(name) {
                continue;
            }

            let rx_bytes = data.total_received();
            let tx_bytes = data.total_transmitted();
            let previous = self.previous.get(name);

            sample.insert(
                sanitize_key(name),
                InterfaceUsage {
                    rx_bytes,
                    tx_bytes,
                    rx_rate: rate(previous.map(|p| p.0), rx_bytes, elapsed),
                    tx_rate: rate(previous.map(|p| p.1), tx_bytes, elapsed),
                },
            );
            current.insert(name.clone(), (rx_bytes, tx_bytes));
        }

        self.previous = current;
        Ok(sample)
    }

    fn entities(&self, sample: &NetworkSample) -> Vec<String> {
        sample.keys().cloned().collect()
    }

    fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery) {
        for iface in entities {
            for (direction, label, icon) in [
                ("rx", "download", "mdi:download-network"),
                ("tx", "upload", "mdi:upload-network"),
            ] {
                let component = sensor(
                    doc,
                    topic,
                    &format!("network_{iface}_{direction}_rate"),
                    format!("{iface} {label} rate"),
                    format!("{{{{ value_json['{iface}'].{direction}_rate }}}}"),
                )
                .with_unit("B/s")
                .with_device_class("data_rate")
                .with_icon(icon);
                doc.add(self.kind(), component);
            }
        }
    }

    fn set_selection_mode(&mut self, mode: SelectionMode) -> Result<(), MetricError> {
        self.mode = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate() {
        assert_eq!(rate(None, 1000, 1.0), 0.0);
        assert_eq!(rate(Some(1000), 3000, 2.0), 1000.0);
        assert_eq!(rate(Some(3000), 1000, 2.0), 0.0);
        assert_eq!(rate(Some(1000), 3000, 0.0), 0.0);
    }

    #[test]
    fn test_selection_mode() {
        let config = NetworkConfig {
            exclude_virtual: true,
            ..Default::default()
        };
        let mut sampler = NetworkSampler {
            networks: Networks::new(),
            mode: config.selection_mode,
            config,
            previous: HashMap::new(),
            last: None,
        };

        assert!(sampler.selected("eth0"));
        assert!(!sampler.selected("lo"));
        assert!(!sampler.selected("docker0"));

        sampler.set_selection_mode(SelectionMode::All).unwrap();
        assert!(sampler.selected("lo"));
        assert!(sampler.selected("docker0"));
    }

    #[test]
    fn test_describe_rates() {
        let sampler = NetworkSampler::new(NetworkConfig::default());
        let mut doc = Discovery::new(
            mqttop_bridge::DiscoveryTarget::new("homeassistant", "h", mqttop_bridge::QoS::AtLeastOnce),
            Default::default(),
            Default::default(),
        );
        sampler.describe("mqttop/h/network", &["eth0".to_string()], &mut doc);

        assert_eq!(
            doc.node("network").unwrap(),
            ["h_network_eth0_rx_rate", "h_network_eth0_tx_rate"]
        );
        let rx = doc.component("h_network_eth0_rx_rate").unwrap();
        assert_eq!(
            rx.value_template.as_deref(),
            Some("{{ value_json['eth0'].rx_rate }}")
        );
        assert_eq!(rx.device_class.as_deref(), Some("data_rate"));
    }
}
