//! MQTT topic builders, parsers and filter matching.

/// Default base topic for everything mqttop publishes or subscribes to.
pub const BASE_TOPIC: &str = "mqttop";

/// Suffix of a metric's update control topic.
pub const UPDATE_SUFFIX: &str = "update";

/// Suffix of a metric's stop control topic.
pub const STOP_SUFFIX: &str = "stop";

/// Builder for topics rooted at a base prefix.
///
/// Topics follow the pattern:
/// `<base>/<relative>` for metric values and `<base>/bridge/<command>`
/// for bridge-level control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    base: String,
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(BASE_TOPIC)
    }
}

impl TopicBuilder {
    /// Create a builder with a custom base prefix.
    ///
    /// Trailing slashes are stripped so `"mqttop/"` and `"mqttop"` behave the same.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The base prefix.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Build a topic below the base prefix.
    ///
    /// # Example
    /// ```
    /// use mqttop_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("mqttop");
    /// assert_eq!(topics.build("host1/cpu"), "mqttop/host1/cpu");
    /// ```
    pub fn build(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, relative.trim_start_matches('/'))
        }
    }

    /// Topic that triggers a refresh of every loaded metric.
    ///
    /// # Example
    /// ```
    /// use mqttop_common::topic::TopicBuilder;
    ///
    /// assert_eq!(TopicBuilder::default().bridge_update(), "mqttop/bridge/update");
    /// ```
    pub fn bridge_update(&self) -> String {
        format!("{}/bridge/{}", self.base, UPDATE_SUFFIX)
    }

    /// Topic that shuts the whole bridge down.
    pub fn bridge_stop(&self) -> String {
        format!("{}/bridge/{}", self.base, STOP_SUFFIX)
    }

    /// Default last-will / liveness state topic.
    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/state", self.base)
    }
}

/// Control command addressed to a single metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Reconfigure (optionally) and refresh now.
    Update,
    /// Stop and unload.
    Stop,
}

impl Control {
    pub fn suffix(&self) -> &'static str {
        match self {
            Control::Update => UPDATE_SUFFIX,
            Control::Stop => STOP_SUFFIX,
        }
    }

    /// Control topic for a metric topic.
    ///
    /// # Example
    /// ```
    /// use mqttop_common::topic::Control;
    ///
    /// assert_eq!(Control::Stop.topic("mqttop/host1/cpu"), "mqttop/host1/cpu/stop");
    /// ```
    pub fn topic(&self, metric_topic: &str) -> String {
        format!("{}/{}", metric_topic, self.suffix())
    }
}

/// Split a control topic into the metric topic and the command.
///
/// Returns `None` when the topic does not end in a known control suffix.
pub fn parse_control(topic: &str) -> Option<(&str, Control)> {
    let (metric, suffix) = topic.rsplit_once('/')?;
    if metric.is_empty() {
        return None;
    }
    match suffix {
        UPDATE_SUFFIX => Some((metric, Control::Update)),
        STOP_SUFFIX => Some((metric, Control::Stop)),
        _ => None,
    }
}

/// Device-based discovery topic: `<prefix>/device/<node_id>/config`.
///
/// # Example
/// ```
/// use mqttop_common::topic::discovery_topic;
///
/// assert_eq!(
///     discovery_topic("homeassistant", "server01"),
///     "homeassistant/device/server01/config"
/// );
/// ```
pub fn discovery_topic(prefix: &str, node_id: &str) -> String {
    format!("{}/device/{}/config", prefix.trim_end_matches('/'), node_id)
}

/// Check whether a topic matches an MQTT topic filter.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including none).
pub fn matches(topic: &str, filter: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_levels.len() {
        let level = filter_levels[fi];

        if level == "#" {
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if level == "+" || level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builder() {
        let topics = TopicBuilder::new("mqttop/");

        assert_eq!(topics.base(), "mqttop");
        assert_eq!(topics.build("host/cpu"), "mqttop/host/cpu");
        assert_eq!(topics.build("/host/cpu"), "mqttop/host/cpu");
        assert_eq!(topics.build(""), "mqttop");
        assert_eq!(topics.bridge_update(), "mqttop/bridge/update");
        assert_eq!(topics.bridge_stop(), "mqttop/bridge/stop");
        assert_eq!(topics.bridge_state(), "mqttop/bridge/state");
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(
            parse_control("m/a/update"),
            Some(("m/a", Control::Update))
        );
        assert_eq!(parse_control("m/a/stop"), Some(("m/a", Control::Stop)));
        assert_eq!(parse_control("m/a/other"), None);
        assert_eq!(parse_control("/stop"), None);
        assert_eq!(parse_control("stop"), None);
    }

    #[test]
    fn test_matches() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(matches("a/b/c", "a/+/c"));
        assert!(matches("a/b/c", "a/#"));
        assert!(matches("a", "a/#"));
        assert!(matches("a/b/c", "#"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b/c", "a/+"));
        assert!(!matches("x/b/c", "a/+/c"));
    }
}
