//! Producers running under a bridge against the in-memory broker client.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mqttop::config::{MqttopConfig, SelectionMode};
use mqttop::producer::{Producer, Sampler};
use mqttop::{build_metrics, device};
use mqttop_bridge::mock::MockClient;
use mqttop_bridge::{
    Bridge, Component, Discovery, DiscoveryTarget, Metric, MetricError, MetricRef, Origin, QoS,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const STATE: &str = "mqttop/bridge/state";
const DOC: &str = "homeassistant/device/host1/config";
const TOPIC: &str = "mqttop/host1/fake";
const WAIT: Duration = Duration::from_secs(2);

/// Entity readings the test can change between ticks.
#[derive(Clone, Default)]
struct Readings(Arc<Mutex<BTreeMap<String, u64>>>);

impl Readings {
    fn set(&self, entity: &str, value: u64) {
        self.0.lock().unwrap().insert(entity.to_string(), value);
    }
}

struct FakeSampler {
    readings: Readings,
    mode: Arc<Mutex<SelectionMode>>,
}

impl Sampler for FakeSampler {
    type Sample = BTreeMap<String, u64>;

    fn kind(&self) -> &'static str {
        "fake"
    }

    fn sample(&mut self) -> Result<Self::Sample, MetricError> {
        Ok(self.readings.0.lock().unwrap().clone())
    }

    fn entities(&self, sample: &Self::Sample) -> Vec<String> {
        sample.keys().cloned().collect()
    }

    fn describe(&self, topic: &str, entities: &[String], doc: &mut Discovery) {
        for entity in entities {
            let component = Component::sensor(doc.unique_id(entity), entity.clone())
                .with_state(topic, format!("{{{{ value_json['{entity}'] }}}}"))
                .with_availability_of(topic);
            doc.add(self.kind(), component);
        }
    }

    fn set_selection_mode(&mut self, mode: SelectionMode) -> Result<(), MetricError> {
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }
}

struct Fixture {
    client: Arc<MockClient>,
    bridge: Arc<Bridge>,
    producer: Arc<Producer<FakeSampler>>,
    readings: Readings,
    mode: Arc<Mutex<SelectionMode>>,
}

fn fixture(with_discovery: bool) -> Fixture {
    let readings = Readings::default();
    readings.set("eth0", 1);
    let mode = Arc::new(Mutex::new(SelectionMode::Filtered));

    let producer = Arc::new(Producer::new(
        TOPIC,
        Duration::from_secs(3600),
        FakeSampler {
            readings: readings.clone(),
            mode: mode.clone(),
        },
    ));

    let client = Arc::new(MockClient::new(STATE));
    let mut builder = Bridge::builder(client.clone())
        .metric(producer.clone())
        .settle_delay(Duration::from_millis(10));
    if with_discovery {
        builder = builder.discovery(Discovery::new(
            DiscoveryTarget::new("homeassistant", "host1", QoS::AtLeastOnce),
            device("host1"),
            Origin::mqttop(),
        ));
    }

    Fixture {
        client,
        bridge: builder.build(),
        producer,
        readings,
        mode,
    }
}

async fn start(f: &Fixture) {
    f.bridge.start(CancellationToken::new()).await.unwrap();
    tokio::time::timeout(WAIT, f.bridge.ready()).await.unwrap();
}

fn json(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap()
}

#[tokio::test]
async fn test_values_flow_to_the_broker() {
    let f = fixture(false);
    start(&f).await;

    let first = f.client.wait_for_publish(WAIT, |p| p.topic == TOPIC).await.unwrap();
    assert_eq!(json(&first.payload), serde_json::json!({"eth0": 1}));
    assert!(!first.retained);
    assert_eq!(f.bridge.state().get(TOPIC), Some(true));

    f.readings.set("eth0", 2);
    f.client.deliver(&format!("{TOPIC}/update"), Vec::new());

    let second = f
        .client
        .wait_for_publish(WAIT, |p| p.topic == TOPIC && p.payload == br#"{"eth0":2}"#)
        .await;
    assert!(second.is_some());

    f.bridge.stop().await;
    assert!(!f.producer.is_running());
}

#[tokio::test]
async fn test_refresh_without_change_is_not_republished() {
    let f = fixture(false);
    start(&f).await;
    f.client.wait_for_publish(WAIT, |p| p.topic == TOPIC).await.unwrap();

    f.client.deliver("mqttop/bridge/update", Vec::new());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(f.client.published_to(TOPIC).len(), 1);
    f.bridge.stop().await;
}

#[tokio::test]
async fn test_update_control_reconfigures_producer() {
    let f = fixture(false);
    start(&f).await;

    f.client.deliver(
        &format!("{TOPIC}/update"),
        br#"{"interval": "30s", "selection_mode": "all"}"#.to_vec(),
    );

    let reconfigured = tokio::time::timeout(WAIT, async {
        while f.producer.interval() != Duration::from_secs(30) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reconfigured.is_ok());
    assert_eq!(*f.mode.lock().unwrap(), SelectionMode::All);

    // A zero interval is rejected and leaves the producer untouched.
    f.client.deliver(&format!("{TOPIC}/update"), br#"{"interval": "0s"}"#.to_vec());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.producer.interval(), Duration::from_secs(30));
    assert_eq!(f.bridge.state().get(TOPIC), Some(true));

    f.bridge.stop().await;
}

#[tokio::test]
async fn test_new_entity_is_rediscovered() {
    let f = fixture(true);
    start(&f).await;

    let announced = f.client.wait_for_publish(WAIT, |p| p.topic == DOC).await.unwrap();
    let doc = json(&announced.payload);
    assert!(doc["components"]["host1_eth0"].is_object());
    assert_eq!(doc["components"]["host1_eth0"]["state_topic"], TOPIC);

    f.readings.set("wlan0", 7);
    f.client.deliver(&format!("{TOPIC}/update"), Vec::new());

    let rediscovered = f
        .client
        .wait_for_publish(WAIT, |p| {
            p.topic == DOC && json(&p.payload)["components"]["host1_wlan0"].is_object()
        })
        .await
        .unwrap();
    let doc = json(&rediscovered.payload);
    assert_eq!(doc["nodes"]["fake"], serde_json::json!(["host1_eth0", "host1_wlan0"]));
    assert!(doc["components"].get("host1_bridge_update").is_none());

    let value = f
        .client
        .wait_for_publish(WAIT, |p| p.topic == TOPIC && p.payload == br#"{"eth0":1,"wlan0":7}"#)
        .await;
    assert!(value.is_some());

    f.bridge.stop().await;
}

#[tokio::test]
async fn test_remote_stop_takes_producer_offline() {
    let f = fixture(false);
    start(&f).await;

    f.client.deliver(&format!("{TOPIC}/stop"), Vec::new());

    let offline = f
        .client
        .wait_for_publish(WAIT, |p| p.topic == STATE && p.payload_str().contains("false"))
        .await;
    assert!(offline.is_some());
    assert!(f.client.wait_until(WAIT, |_| f.bridge.state().get(TOPIC).is_none()).await);
    assert!(!f.producer.is_running());

    f.bridge.stop().await;
    assert_eq!(f.client.published_to(STATE).last().unwrap().payload_str(), "{}");
}

#[tokio::test]
async fn test_build_metrics_from_config() {
    let config: MqttopConfig = json5::from_str(
        r#"{
            metrics: {
                memory: { enabled: false },
                disk: { enabled: false },
                network: { topic: "net" },
            },
        }"#,
    )
    .unwrap();

    let metrics: Vec<MetricRef> = build_metrics(&config, "host1");
    let topics: Vec<_> = metrics.iter().map(|m| m.topic().to_string()).collect();
    assert_eq!(
        topics,
        ["mqttop/host1/cpu", "mqttop/net", "mqttop/host1/system"]
    );
    let kinds: Vec<_> = metrics.iter().map(|m| m.kind().to_string()).collect();
    assert_eq!(kinds, ["cpu", "network", "system"]);
}
