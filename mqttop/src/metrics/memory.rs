//! Memory and swap usage.

use mqttop_bridge::{Discovery, MetricError};
use serde::Serialize;
use sysinfo::System;

use super::{percent, sensor};
use crate::producer::Sampler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_percent: f64,
}

pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MemorySampler {
    type Sample = MemorySample;

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn sample(&mut self) -> Result<MemorySample, MetricError> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();

        Ok(MemorySample {
            total,
            used,
            available: self.system.available_memory(),
            percent: percent(used, total),
            swap_total,
            swap_used,
            swap_percent: percent(swap_used, swap_total),
        })
    }

    fn describe(&self, topic: &str, _entities: &[String], doc: &mut Discovery) {
        let bytes = [
            ("memory_used", "Memory used", "used"),
            ("memory_available", "Memory available", "available"),
            ("swap_used", "Swap used", "swap_used"),
        ];
        for (id, name, field) in bytes {
            let component = sensor(doc, topic, id, name, format!("{{{{ value_json.{field} }}}}"))
                .with_unit("B")
                .with_device_class("data_size");
            doc.add(self.kind(), component);
        }

        let percents = [
            ("memory_percent", "Memory usage", "percent"),
            ("swap_percent", "Swap usage", "swap_percent"),
        ];
        for (id, name, field) in percents {
            let component = sensor(doc, topic, id, name, format!("{{{{ value_json.{field} }}}}"))
                .with_unit("%")
                .with_icon("mdi:memory");
            doc.add(self.kind(), component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_consistent() {
        let mut sampler = MemorySampler::new();
        let sample = sampler.sample().unwrap();

        assert!(sample.used <= sample.total);
        assert!((0.0..=100.0).contains(&sample.percent));
        if sample.swap_total == 0 {
            assert_eq!(sample.swap_percent, 0.0);
        }
        assert!(sampler.entities(&sample).is_empty());
    }
}
