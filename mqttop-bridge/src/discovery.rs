//! Auto-discovery announcement document.
//!
//! The document follows the device-based discovery layout understood by home
//! automation platforms: one device, one origin, and a map of components keyed
//! by unique id. On top of that the bridge keeps `nodes`, which records the
//! component ids each producer type (metric kind) contributed. `nodes` is what
//! makes incremental rediscovery possible: when a producer's entity set
//! changes only its own components are rebuilt and republished.
//!
//! A component reduced to its platform alone is a removal marker; consumers
//! delete the entity when they receive it.

use std::collections::BTreeMap;

use mqttop_common::{QoS, discovery_topic};
use serde::{Deserialize, Serialize};

use crate::client::{BrokerClient, MessageHandler};
use crate::error::Result;
use crate::token::Token;

/// Node name under which the bridge announces its own controls.
pub const BRIDGE_NODE: &str = "bridge";

/// The device every component belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// The software announcing the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
}

impl Origin {
    /// Origin describing this build of mqttop.
    pub fn mqttop() -> Self {
        Self {
            name: "mqttop".to_string(),
            sw_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            support_url: Some(env!("CARGO_PKG_REPOSITORY").to_string()),
        }
    }
}

/// One addressable entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<String>,
}

impl Component {
    /// A measurement sensor reading `value_template` from `state_topic`.
    pub fn sensor(unique_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            platform: "sensor".to_string(),
            unique_id: unique_id.into(),
            name: Some(name.into()),
            state_class: Some("measurement".to_string()),
            ..Default::default()
        }
    }

    /// A button publishing `payload_press` to `command_topic`.
    pub fn button(
        unique_id: impl Into<String>,
        name: impl Into<String>,
        command_topic: impl Into<String>,
    ) -> Self {
        Self {
            platform: "button".to_string(),
            unique_id: unique_id.into(),
            name: Some(name.into()),
            command_topic: Some(command_topic.into()),
            payload_press: Some(String::new()),
            ..Default::default()
        }
    }

    /// Removal marker: the platform and nothing else.
    pub fn placeholder(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder(self.platform.clone())
    }

    pub fn with_state(mut self, topic: impl Into<String>, value_template: impl Into<String>) -> Self {
        self.state_topic = Some(topic.into());
        self.value_template = Some(value_template.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measurement = Some(unit.into());
        self
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into());
        self
    }

    pub fn with_state_class(mut self, class: Option<&str>) -> Self {
        self.state_class = class.map(str::to_string);
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_entity_category(mut self, category: impl Into<String>) -> Self {
        self.entity_category = Some(category.into());
        self
    }

    /// Mark the component available only while `metric_topic` is alive in the
    /// state map published on the availability topic.
    pub fn with_availability_of(mut self, metric_topic: &str) -> Self {
        self.availability_template = Some(availability_template(metric_topic));
        self
    }
}

/// Template turning the state map into `online` / `offline` for one topic.
///
/// # Example
/// ```
/// use mqttop_bridge::discovery::availability_template;
///
/// assert_eq!(
///     availability_template("mqttop/cpu"),
///     "{{ 'online' if value_json.get('mqttop/cpu', false) else 'offline' }}"
/// );
/// ```
pub fn availability_template(metric_topic: &str) -> String {
    format!(
        "{{{{ 'online' if value_json.get('{}', false) else 'offline' }}}}",
        metric_topic
    )
}

/// Where and how the document is published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryTarget {
    /// Identifier of this bridge instance, used in topics and unique ids.
    pub node_id: String,
    /// Retained topic the document is published to.
    pub topic: String,
    pub qos: QoS,
}

impl DiscoveryTarget {
    pub fn new(prefix: &str, node_id: impl Into<String>, qos: QoS) -> Self {
        let node_id = sanitize_id(&node_id.into());
        Self {
            topic: discovery_topic(prefix, &node_id),
            node_id,
            qos,
        }
    }
}

/// Discovery document plus per-producer ownership bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(skip)]
    target: DiscoveryTarget,
    pub device: Device,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    #[serde(default)]
    components: BTreeMap<String, Component>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    nodes: BTreeMap<String, Vec<String>>,
}

impl Discovery {
    pub fn new(target: DiscoveryTarget, device: Device, origin: Origin) -> Self {
        Self {
            target,
            device,
            origin,
            availability_topic: None,
            components: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &DiscoveryTarget {
        &self.target
    }

    pub fn node_id(&self) -> &str {
        &self.target.node_id
    }

    pub fn topic(&self) -> &str {
        &self.target.topic
    }

    /// Build a unique id scoped to this bridge instance.
    pub fn unique_id(&self, suffix: &str) -> String {
        sanitize_id(&format!("{}_{}", self.target.node_id, suffix))
    }

    pub fn set_availability_topic(&mut self, topic: impl Into<String>) {
        self.availability_topic = Some(topic.into());
    }

    /// Add or replace a component owned by `node`.
    ///
    /// The id is appended to the node list unconditionally; duplicates are
    /// folded by [`finish_node`](Self::finish_node) or
    /// [`normalize`](Self::normalize).
    pub fn add(&mut self, node: &str, component: Component) {
        let id = component.unique_id.clone();
        self.nodes.entry(node.to_string()).or_default().push(id.clone());
        self.components.insert(id, component);
    }

    pub fn component(&self, unique_id: &str) -> Option<&Component> {
        self.components.get(unique_id)
    }

    pub fn components(&self) -> &BTreeMap<String, Component> {
        &self.components
    }

    pub fn node(&self, node: &str) -> Option<&[String]> {
        self.nodes.get(node).map(Vec::as_slice)
    }

    pub fn nodes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.nodes
    }

    /// Sort and deduplicate every node list.
    pub fn normalize(&mut self) {
        for ids in self.nodes.values_mut() {
            ids.sort();
            ids.dedup();
        }
    }

    /// Reduce every component of `node` to a removal marker.
    ///
    /// Returns the node's id count before the producer repopulates it.
    pub fn reset_node(&mut self, node: &str) -> usize {
        let Some(ids) = self.nodes.get(node) else {
            return 0;
        };

        for id in ids {
            if let Some(component) = self.components.get_mut(id) {
                *component = Component::placeholder(component.platform.clone());
            }
        }
        ids.len()
    }

    /// Fold duplicates after a producer repopulated `node`.
    pub fn finish_node(&mut self, node: &str, previous_len: usize) {
        if let Some(ids) = self.nodes.get_mut(node) {
            if ids.len() > previous_len {
                ids.sort();
                ids.dedup();
            }
        }
    }

    /// Drop components of `node` still in placeholder form.
    ///
    /// Called once the removal markers have been published. Returns the number
    /// of components dropped.
    pub fn prune_node(&mut self, node: &str) -> usize {
        let Some(ids) = self.nodes.get_mut(node) else {
            return 0;
        };

        let components = &mut self.components;
        let before = ids.len();
        ids.retain(|id| match components.get(id).map(Component::is_placeholder) {
            Some(true) => {
                components.remove(id);
                false
            }
            Some(false) => true,
            None => false,
        });
        let dropped = before - ids.len();

        if ids.is_empty() {
            self.nodes.remove(node);
        }
        dropped
    }

    /// Copy of the document restricted to the components of `node`.
    pub fn subset(&self, node: &str) -> Discovery {
        let ids = self.nodes.get(node).cloned().unwrap_or_default();
        let components = ids
            .iter()
            .filter_map(|id| self.components.get(id).map(|c| (id.clone(), c.clone())))
            .collect();

        Discovery {
            target: self.target.clone(),
            device: self.device.clone(),
            origin: self.origin.clone(),
            availability_topic: self.availability_topic.clone(),
            components,
            nodes: BTreeMap::from([(node.to_string(), ids)]),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Publish the whole document (retained).
    pub fn publish(&self, client: &dyn BrokerClient) -> Result<Token> {
        let payload = self.to_json()?;
        Ok(client.publish(&self.target.topic, self.target.qos, true, payload))
    }

    /// Publish only the components owned by `node` (retained).
    pub fn publish_node(&self, client: &dyn BrokerClient, node: &str) -> Result<Token> {
        self.subset(node).publish(client)
    }

    /// Subscribe to the document's own topic.
    ///
    /// The broker echoes the retained document back once it has it, which is
    /// the signal that consumers can see the announced entities.
    pub fn subscribe_gate(&self, client: &dyn BrokerClient, handler: MessageHandler) -> Token {
        client.subscribe(&self.target.topic, self.target.qos, handler)
    }
}

/// Replace characters that are not allowed in ids and topic levels.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
