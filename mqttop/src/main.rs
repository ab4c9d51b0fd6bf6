//! MQTT bridge for system monitoring.
//!
//! Collects local system metrics and republishes them on an MQTT broker,
//! announcing them through auto-discovery.

use anyhow::Result;
use mqttop_bridge::{BridgeRunner, run_bridge};

use mqttop::config::MqttopConfig;
use mqttop::{build_metrics, device};

#[tokio::main]
async fn main() -> Result<()> {
    let setup = |runner: &mut BridgeRunner<MqttopConfig>| {
        let hostname = runner.node_id().to_string();

        for metric in build_metrics(runner.config(), &hostname) {
            runner.add_metric(metric);
        }
        runner.set_device(device(&hostname));

        tracing::info!(
            hostname = %hostname,
            metrics = runner.metric_count(),
            "mqttop starting"
        );
    };

    // Run until Ctrl+C or a remote stop (handles shutdown gracefully)
    run_bridge("mqttop", "mqttop.json5", MqttopConfig::get_hostname, setup).await
}
