//! Integration tests for mqttop-common library.

use mqttop_common::topic::matches;
use mqttop_common::{
    Control, DiscoveryConfig, MqttConfig, QoS, TopicBuilder, discovery_topic, parse_config,
    parse_control,
};

#[test]
fn test_control_topic_workflow() {
    let topics = TopicBuilder::new("mqttop");
    let metric = topics.build("server01/cpu");

    // Build the control topics a metric subscribes to
    let update = Control::Update.topic(&metric);
    let stop = Control::Stop.topic(&metric);
    assert_eq!(update, "mqttop/server01/cpu/update");
    assert_eq!(stop, "mqttop/server01/cpu/stop");

    // Parse them back
    assert_eq!(parse_control(&update), Some((metric.as_str(), Control::Update)));
    assert_eq!(parse_control(&stop), Some((metric.as_str(), Control::Stop)));

    // A wildcard subscription on the base sees both
    assert!(matches(&update, "mqttop/#"));
    assert!(matches(&stop, "mqttop/+/+/stop"));
    assert!(!matches(&update, "mqttop/+/+/stop"));
}

#[test]
fn test_bridge_topics_share_base() {
    let topics = TopicBuilder::new("metrics/host1");

    for topic in [
        topics.bridge_update(),
        topics.bridge_stop(),
        topics.bridge_state(),
    ] {
        assert!(topic.starts_with("metrics/host1/bridge/"));
        assert!(matches(&topic, "metrics/host1/bridge/+"));
    }
}

#[test]
fn test_discovery_topic_is_retained_per_node() {
    let config: DiscoveryConfig = parse_config(r#"{ prefix: "ha/" }"#).unwrap();

    assert_eq!(
        discovery_topic(&config.prefix, "server01"),
        "ha/device/server01/config"
    );
    assert_eq!(config.qos, QoS::AtLeastOnce);
}

#[test]
fn test_qos_levels_roundtrip_through_json() {
    for (qos, level) in [
        (QoS::AtMostOnce, 0u8),
        (QoS::AtLeastOnce, 1),
        (QoS::ExactlyOnce, 2),
    ] {
        let json = serde_json::to_string(&qos).unwrap();
        assert_eq!(json, level.to_string());
        assert_eq!(serde_json::from_str::<QoS>(&json).unwrap(), qos);
    }

    assert!(serde_json::from_str::<QoS>("7").is_err());
}

#[test]
fn test_mqtt_config_partial_override() {
    let config: MqttConfig = parse_config(
        r#"{
            host: "10.0.0.2",
            last_will: { topic: "custom/state" },
        }"#,
    )
    .unwrap();

    assert_eq!(config.host, "10.0.0.2");
    assert_eq!(config.port, 1883);
    assert_eq!(config.last_will.topic, "custom/state");
    assert_eq!(config.last_will.payload, "{}");
    assert_eq!(config.last_will.qos, QoS::AtLeastOnce);
}
