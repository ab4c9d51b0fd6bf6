//! mqttop Bridge Framework
//!
//! Republishes independently updating metrics onto an MQTT broker.
//!
//! # Overview
//!
//! This crate provides:
//! - [`Bridge`] which loads metrics, publishes their values, tracks their
//!   liveness in a retained state map and answers control topics
//! - [`Metric`] the contract every metric producer implements, with the
//!   optional [`Discoverer`] and [`Reconfigurable`] capabilities
//! - [`BrokerClient`] the broker capability the bridge consumes, implemented
//!   by [`MqttClient`] (rumqttc) and [`mock::MockClient`] (in memory)
//! - [`Discovery`] the auto-discovery document with incremental rediscovery
//! - [`BridgeConfig`], [`BridgeArgs`] and [`BridgeRunner`] for applications
//!
//! # Example
//!
//! ```ignore
//! use mqttop_bridge::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mqttop.json5");
//!     let config = MyConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mqttop", config, Some(&args), "host1")?;
//!     runner.add_metric(my_metric());
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
pub mod bridge;
pub mod client;
mod config;
pub mod control;
pub mod discovery;
mod error;
pub mod health;
pub mod metric;
pub mod mock;
pub mod mqtt;
mod runner;
pub mod state;
pub mod token;

pub use args::BridgeArgs;
pub use bridge::{Bridge, BridgeBuilder};
pub use client::{BrokerClient, ClientOptions, LastWill, Message, MessageHandler};
pub use config::{BridgeConfig, validate_mqtt};
pub use control::UpdateRequest;
pub use discovery::{Component, Device, Discovery, DiscoveryTarget, Origin};
pub use error::{BridgeError, Result};
pub use metric::{Discoverer, Metric, MetricError, MetricRef, Outcome, OutcomeReceiver, Reconfigurable};
pub use mqtt::MqttClient;
pub use runner::{BridgeRunner, run_bridge};
pub use state::StateMap;
pub use token::{ClientError, Settled, Token, TokenCompleter};

// Re-export commonly used types from mqttop-common
pub use mqttop_common::{DiscoveryConfig, LogFormat, LoggingConfig, MqttConfig, QoS};
