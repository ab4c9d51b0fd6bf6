//! sysinfo-backed samplers.
//!
//! Each sampler serializes one JSON object per tick onto its metric topic.
//! Producers with sub-entities (cores, mounts, interfaces) key them by a
//! sanitized name, which is also what discovery ids and templates use.

use mqttop_bridge::{Component, Discovery};

mod cpu;
mod disk;
mod memory;
mod network;
mod system;

pub use cpu::CpuSampler;
pub use disk::DiskSampler;
pub use memory::MemorySampler;
pub use network::NetworkSampler;
pub use system::SystemSampler;

/// Sanitize a string for use in topic levels and discovery ids.
/// Replaces problematic characters with underscores.
pub(crate) fn sanitize_key(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '/' | ' ' | '#' | '+' | '.' => {
                if !result.ends_with('_') && !result.is_empty() {
                    result.push('_');
                }
            }
            _ => result.push(c),
        }
    }
    result.trim_matches('_').to_string()
}

/// Round to one decimal so jitter below display precision reads as unchanged.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        round1(part as f64 / total as f64 * 100.0)
    } else {
        0.0
    }
}

/// Sensor reading `template` from `topic`, available while the metric is.
pub(crate) fn sensor(
    doc: &Discovery,
    topic: &str,
    id: &str,
    name: impl Into<String>,
    template: impl Into<String>,
) -> Component {
    Component::sensor(doc.unique_id(id), name)
        .with_state(topic, template)
        .with_availability_of(topic)
}
