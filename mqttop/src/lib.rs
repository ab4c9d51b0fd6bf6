//! MQTT bridge for system monitoring.
//!
//! Collects local system metrics (CPU, memory, disk, network, system) using
//! the `sysinfo` crate and republishes them through [`mqttop_bridge::Bridge`].
//!
//! # Topics
//!
//! ```text
//! mqttop/<hostname>/cpu        {"usage":12.5,"cores":{"cpu0":10.0}}
//! mqttop/<hostname>/memory     {"total":...,"used":...,"percent":41.2,...}
//! mqttop/<hostname>/disk       {"root":{"mount":"/","percent":63.0,...}}
//! mqttop/<hostname>/network    {"eth0":{"rx_rate":1024.0,...}}
//! mqttop/<hostname>/system     {"uptime":3600,"load1":0.4,...}
//! mqttop/bridge/state          {"mqttop/<hostname>/cpu":true,...}
//! ```

use std::sync::Arc;

use mqttop_bridge::{Device, MetricRef};
use mqttop_common::TopicBuilder;

pub mod config;
pub mod metrics;
pub mod producer;

use config::{MetricConfig, MqttopConfig};
use metrics::{CpuSampler, DiskSampler, MemorySampler, NetworkSampler, SystemSampler};
use producer::{Producer, Sampler};

/// Topic of one metric: the configured one, or `<hostname>/<kind>`, below
/// the base topic.
pub fn metric_topic(base: &str, hostname: &str, kind: &str, metric: &MetricConfig) -> String {
    let relative = match &metric.topic {
        Some(topic) => topic.clone(),
        None => format!("{}/{}", hostname, kind),
    };
    TopicBuilder::new(base).build(&relative)
}

/// Build a producer for every enabled metric section.
pub fn build_metrics(config: &MqttopConfig, hostname: &str) -> Vec<MetricRef> {
    let base = &config.mqtt.base_topic;
    let sections = &config.metrics;
    let mut metrics: Vec<MetricRef> = Vec::new();

    fn push<S: Sampler>(
        metrics: &mut Vec<MetricRef>,
        base: &str,
        hostname: &str,
        metric: &MetricConfig,
        sampler: impl FnOnce() -> S,
    ) {
        if !metric.enabled {
            return;
        }
        let sampler = sampler();
        let topic = metric_topic(base, hostname, sampler.kind(), metric);
        tracing::debug!(%topic, interval = ?metric.interval, "Metric enabled");
        metrics.push(Arc::new(Producer::new(topic, metric.interval, sampler)));
    }

    push(&mut metrics, base, hostname, &sections.cpu, CpuSampler::new);
    push(&mut metrics, base, hostname, &sections.memory, MemorySampler::new);
    push(&mut metrics, base, hostname, &sections.disk.metric, || {
        DiskSampler::new(sections.disk.clone())
    });
    push(&mut metrics, base, hostname, &sections.network.metric, || {
        NetworkSampler::new(sections.network.clone())
    });
    push(&mut metrics, base, hostname, &sections.system, SystemSampler::default);

    metrics
}

/// Discovery device describing this host.
pub fn device(hostname: &str) -> Device {
    Device {
        identifiers: vec![format!("mqttop_{}", hostname)],
        name: hostname.to_string(),
        model: Some(std::env::consts::OS.to_string()),
        manufacturer: Some("mqttop".to_string()),
        sw_version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }
}
