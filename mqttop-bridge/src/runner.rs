//! Bridge runner for lifecycle management.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use mqttop_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::bridge::Bridge;
use crate::client::BrokerClient;
use crate::config::BridgeConfig;
use crate::discovery::{Device, Discovery, DiscoveryTarget, Origin};
use crate::error::{BridgeError, Result};
use crate::metric::MetricRef;
use crate::mqtt::MqttClient;

/// Runs a bridge from configuration to shutdown.
///
/// Handles:
/// - Logging initialization
/// - Building the MQTT client and the discovery document
/// - Starting the [`Bridge`]
/// - Graceful shutdown on Ctrl+C or a remote stop request
///
/// # Example
///
/// ```ignore
/// use mqttop_bridge::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mqttop.json5");
///     let config = MyConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mqttop", config, Some(&args), "host1")?;
///     runner.add_metric(my_metric());
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    version: String,
    config: C,
    /// Identifier of this instance in discovery topics.
    node_id: String,
    client: Arc<MqttClient>,
    metrics: Vec<MetricRef>,
    device: Option<Device>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a runner without CLI overrides.
    pub fn new(name: impl Into<String>, config: C, node_id: impl Into<String>) -> Result<Self> {
        Self::new_with_args(name, config, None, node_id)
    }

    /// Create a runner with CLI args for log level override.
    ///
    /// `node_id` names this instance (usually the host name); it seeds the
    /// default client id and the discovery topic.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
        node_id: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let node_id = node_id.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let client_id = config.mqtt().client_id_for(&node_id);
        let client = Arc::new(MqttClient::new(config.mqtt(), client_id));

        tracing::info!(
            host = %config.mqtt().host,
            port = config.mqtt().port,
            client_id = %client.options().client_id,
            "MQTT client configured"
        );

        Ok(Self {
            name,
            version,
            config,
            node_id,
            client,
            metrics: Vec::new(),
            device: None,
        })
    }

    /// Device announced in the discovery document.
    ///
    /// Without one, a device named after the node id is announced.
    pub fn with_device(mut self, device: Device) -> Self {
        self.set_device(device);
        self
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = Some(device);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register a metric to load at startup.
    pub fn add_metric(&mut self, metric: MetricRef) {
        self.metrics.push(metric);
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    fn discovery(&self) -> Option<Discovery> {
        let settings = self.config.discovery();
        if !settings.enabled {
            return None;
        }

        let target = DiscoveryTarget::new(&settings.prefix, self.node_id.as_str(), settings.qos);
        let device = self.device.clone().unwrap_or_else(|| Device {
            identifiers: vec![target.node_id.clone()],
            name: self.node_id.clone(),
            ..Default::default()
        });
        Some(Discovery::new(target, device, Origin::mqttop()))
    }

    /// Run the bridge until Ctrl+C is received or it is stopped remotely.
    ///
    /// This will:
    /// 1. Connect and start every registered metric
    /// 2. Wait for Ctrl+C or a `bridge/stop` request
    /// 3. Stop the bridge, which publishes the final state and disconnects
    pub async fn run(self) -> Result<()> {
        let mut builder = Bridge::builder(self.client.clone())
            .base_topic(self.config.mqtt().base_topic.clone())
            .metrics(self.metrics.iter().cloned())
            .settle_delay(self.config.discovery().settle_delay())
            .offline_after_failures(self.config.offline_after_failures());
        if let Some(doc) = self.discovery() {
            builder = builder.discovery(doc);
        }
        let bridge = builder.build();

        let cancel = CancellationToken::new();
        bridge.start(cancel.clone()).await?;
        bridge.ready().await;

        if let Some(e) = bridge.error() {
            tracing::warn!(error = %e, "Bridge started with errors");
        }

        tracing::info!(
            bridge = %self.name,
            metrics = bridge.state().len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
            _ = bridge.done() => {
                tracing::info!(bridge = %self.name, "Bridge stopped remotely");
            }
        }

        cancel.cancel();
        bridge.stop().await;

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Convenience function to run a bridge with minimal boilerplate.
///
/// `node_id` resolves the instance identifier from the loaded configuration.
///
/// # Example
///
/// ```ignore
/// use mqttop_bridge::{run_bridge, BridgeConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     run_bridge("mybridge", "mybridge.json5", |_: &MyConfig| "host1".into(), |runner| {
///         runner.add_metric(my_metric());
///     })
///     .await
/// }
/// ```
pub async fn run_bridge<C, N, F>(
    name: &str,
    default_config: &'static str,
    node_id: N,
    setup: F,
) -> anyhow::Result<()>
where
    C: BridgeConfig,
    N: FnOnce(&C) -> String,
    F: FnOnce(&mut BridgeRunner<C>),
{
    let args = BridgeArgs::parse_with_default(default_config);
    let config = C::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let node_id = node_id(&config);

    let mut runner = BridgeRunner::new_with_args(name, config, Some(&args), node_id)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    setup(&mut runner);

    runner.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
