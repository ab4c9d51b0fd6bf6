//! Uptime, boot time and load averages.

use mqttop_bridge::{Discovery, MetricError};
use serde::Serialize;
use sysinfo::System;

use super::{round1, sensor};
use crate::producer::Sampler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSample {
    /// Seconds since boot.
    pub uptime: u64,
    /// Boot time as a Unix timestamp.
    pub boot_time: u64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Default)]
pub struct SystemSampler;

impl Sampler for SystemSampler {
    type Sample = SystemSample;

    fn kind(&self) -> &'static str {
        "system"
    }

    fn sample(&mut self) -> Result<SystemSample, MetricError> {
        let load = System::load_average();
        Ok(SystemSample {
            uptime: System::uptime(),
            boot_time: System::boot_time(),
            load1: round1(load.one),
            load5: round1(load.five),
            load15: round1(load.fifteen),
        })
    }

    fn describe(&self, topic: &str, _entities: &[String], doc: &mut Discovery) {
        let uptime = sensor(doc, topic, "uptime", "Uptime", "{{ value_json.uptime }}")
            .with_unit("s")
            .with_device_class("duration")
            .with_state_class(Some("total_increasing"))
            .with_entity_category("diagnostic");
        doc.add(self.kind(), uptime);

        let boot = sensor(
            doc,
            topic,
            "boot_time",
            "Last boot",
            "{{ as_datetime(value_json.boot_time) }}",
        )
        .with_device_class("timestamp")
        .with_state_class(None)
        .with_entity_category("diagnostic");
        doc.add(self.kind(), boot);

        for (id, name, field) in [
            ("load_1", "Load (1m)", "load1"),
            ("load_5", "Load (5m)", "load5"),
            ("load_15", "Load (15m)", "load15"),
        ] {
            let component = sensor(doc, topic, id, name, format!("{{{{ value_json.{field} }}}}"))
                .with_icon("mdi:gauge");
            doc.add(self.kind(), component);
        }
    }
}
