//! Global and per-core CPU usage.

use std::collections::BTreeMap;

use mqttop_bridge::{Discovery, MetricError};
use serde::Serialize;
use sysinfo::System;

use super::{round1, sanitize_key, sensor};
use crate::producer::Sampler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuSample {
    /// Usage across all cores, in percent.
    pub usage: f64,
    pub cores: BTreeMap<String, f64>,
}

pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    type Sample = CpuSample;

    fn kind(&self) -> &'static str {
        "cpu"
    }

    fn sample(&mut self) -> Result<CpuSample, MetricError> {
        self.system.refresh_cpu_usage();

        if self.system.cpus().is_empty() {
            return Err(MetricError::Sample("no CPU reported".to_string()));
        }

        let cores = self
            .system
            .cpus()
            .iter()
            .map(|cpu| (sanitize_key(cpu.name()), round1(cpu.cpu_usage() as f64)))
            .collect();

        Ok(CpuSample {
            usage: round1(self.system.global_cpu_usage() as f64),
            cores,
        })
    }

    fn entities(&self, sample: &CpuSample) -> Vec<String> {
        sample.cores.keys().cloned().collect()
    }

    fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery) {
        let usage = sensor(doc, topic, "cpu_usage", "CPU usage", "{{ value_json.usage }}")
            .with_unit("%")
            .with_icon("mdi:cpu-64-bit");
        doc.add(self.kind(), usage);

        for core in entities {
            let component = sensor(
                doc,
                topic,
                &format!("cpu_{core}_usage"),
                format!("CPU {core} usage"),
                format!("{{{{ value_json.cores['{core}'] }}}}"),
            )
            .with_unit("%")
            .with_icon("mdi:cpu-64-bit")
            .with_entity_category("diagnostic");
            doc.add(self.kind(), component);
        }
    }
}
