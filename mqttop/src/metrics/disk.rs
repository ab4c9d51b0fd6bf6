//! Per mount point disk usage.

use std::collections::BTreeMap;

use mqttop_bridge::{Discovery, MetricError};
use serde::Serialize;
use sysinfo::Disks;

use super::{percent, sanitize_key, sensor};
use crate::config::{DiskConfig, SelectionMode};
use crate::producer::Sampler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub mount: String,
    pub fs_type: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub percent: f64,
}

/// Disk usage keyed by sanitized mount point.
pub type DiskSample = BTreeMap<String, DiskUsage>;

pub struct DiskSampler {
    disks: Disks,
    config: DiskConfig,
    mode: SelectionMode,
    /// Mount point behind each key, for display names.
    mounts: BTreeMap<String, String>,
}

impl DiskSampler {
    pub fn new(config: DiskConfig) -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
            mode: config.selection_mode,
            config,
            mounts: BTreeMap::new(),
        }
    }

    fn selected(&self, mount_point: &str, fs_type: &str) -> bool {
        match self.mode {
            SelectionMode::All => true,
            SelectionMode::Filtered => self.config.should_include(mount_point, fs_type),
        }
    }
}

/// Key for a mount point; `/` would sanitize to nothing.
fn mount_key(mount_point: &str) -> String {
    match sanitize_key(mount_point) {
        key if key.is_empty() => "root".to_string(),
        key => key,
    }
}

impl Sampler for DiskSampler {
    type Sample = DiskSample;

    fn kind(&self) -> &'static str {
        "disk"
    }

    fn sample(&mut self) -> Result<DiskSample, MetricError> {
        self.disks.refresh(true);

        let mut sample = DiskSample::new();
        for disk in self.disks.list() {
            let mount = disk.mount_point().to_string_lossy().to_string();
            let fs_type = disk.file_system().to_string_lossy().to_string();
            if !self.selected(&mount, &fs_type) {
                continue;
            }

            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            sample.insert(
                mount_key(&mount),
                DiskUsage {
                    mount,
                    fs_type,
                    total,
                    used,
                    available,
                    percent: percent(used, total),
                },
            );
        }

        self.mounts = sample
            .iter()
            .map(|(key, usage)| (key.clone(), usage.mount.clone()))
            .collect();
        Ok(sample)
    }

    fn entities(&self, sample: &DiskSample) -> Vec<String> {
        sample.keys().cloned().collect()
    }

    fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery) {
        for key in entities {
            let mount = self.mounts.get(key).map_or(key.as_str(), String::as_str);

            let usage = sensor(
                doc,
                topic,
                &format!("disk_{key}_percent"),
                format!("Disk {mount} usage"),
                format!("{{{{ value_json['{key}'].percent }}}}"),
            )
            .with_unit("%")
            .with_icon("mdi:harddisk");
            doc.add(self.kind(), usage);

            let free = sensor(
                doc,
                topic,
                &format!("disk_{key}_available"),
                format!("Disk {mount} free"),
                format!("{{{{ value_json['{key}'].available }}}}"),
            )
            .with_unit("B")
            .with_device_class("data_size");
            doc.add(self.kind(), free);
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

    fn sampler(mode: SelectionMode) -> DiskSampler {
        DiskSampler {
            disks: Disks::new(),
            config: DiskConfig {
                exclude: vec!["/boot".to_string()],
                selection_mode: mode,
                ..Default::default()
            },
            mode,
            mounts: BTreeMap::new(),
        }
    }

    #[test]
    fn test_mount_key() {
        assert_eq!(mount_key("/"), "root");
        assert_eq!(mount_key("/home"), "home");
        assert_eq!(mount_key("/var/lib"), "var_lib");
    }

    #[test]
    fn test_selection_mode() {
        let mut sampler = sampler(SelectionMode::Filtered);
        assert!(sampler.selected("/", "ext4"));
        assert!(!sampler.selected("/boot", "ext4"));
        assert!(!sampler.selected("/run", "tmpfs"));

        sampler.set_selection_mode(SelectionMode::All).unwrap();
        assert!(sampler.selected("/boot", "ext4"));
        assert!(sampler.selected("/run", "tmpfs"));
    }

    #[test]
    fn test_describe_uses_mount_names() {
        let mut sampler = sampler(SelectionMode::Filtered);
        sampler.mounts.insert("root".to_string(), "/".to_string());

        let mut doc = Discovery::new(
            mqttop_bridge::DiscoveryTarget::new("homeassistant", "h", mqttop_bridge::QoS::AtLeastOnce),
            Default::default(),
            Default::default(),
        );
        sampler.describe("mqttop/h/disk", &["root".to_string()], &mut doc);

        let usage = doc.component("h_disk_root_percent").unwrap();
        assert_eq!(usage.name.as_deref(), Some("Disk / usage"));
        assert_eq!(
            usage.value_template.as_deref(),
            Some("{{ value_json['root'].percent }}")
        );
        assert_eq!(doc.node("disk").unwrap().len(), 2);
    }
}
