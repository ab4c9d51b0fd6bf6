//! Broker client capability consumed by the bridge.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mqttop_common::QoS;

use crate::token::Token;

/// An inbound message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Callback invoked for every message matching a subscription.
///
/// Handlers run on the client's delivery task and must not block.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Last-will message registered with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
}

/// Read-only snapshot of the options a client was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub client_id: String,
    pub will: LastWill,
}

/// Publish/subscribe broker client.
///
/// All operations are asynchronous and report completion through a [`Token`].
/// Implementations own reconnection; the bridge never retries.
pub trait BrokerClient: Send + Sync + 'static {
    /// Start connecting to the broker.
    fn connect(&self) -> Token;

    /// Disconnect, giving in-flight work up to `grace` to drain.
    fn disconnect(&self, grace: Duration);

    /// Whether a broker connection is currently established.
    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, qos: QoS, retained: bool, payload: Vec<u8>) -> Token;

    fn subscribe(&self, filter: &str, qos: QoS, handler: MessageHandler) -> Token;

    /// Subscribe several filters to one handler with a single request.
    fn subscribe_multiple(&self, filters: &[(String, QoS)], handler: MessageHandler) -> Token;

    fn unsubscribe(&self, filters: &[String]) -> Token;

    /// Options snapshot, including the last-will parameters.
    fn options(&self) -> &ClientOptions;
}

impl fmt::Debug for dyn BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("client_id", &self.options().client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
