//! Control-topic message handling.
//!
//! Each loaded metric listens on `<topic>/update` and `<topic>/stop`; the
//! bridge itself listens on `<base>/bridge/update` and `<base>/bridge/stop`.
//! Handlers only hold a weak reference to the bridge so the client's handler
//! table never keeps a stopped bridge alive.

use std::sync::{Arc, Weak};
use std::time::Duration;

use mqttop_common::{Control, parse_control};
use serde::Deserialize;

use crate::bridge::Bridge;
use crate::client::{Message, MessageHandler};
use crate::metric::{Metric, MetricError, MetricRef};

/// Body of a `<topic>/update` message.
///
/// ```json
/// {"interval": "10s", "selection_mode": "filtered"}
/// ```
///
/// Both fields are optional and an empty body is a plain refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub selection_mode: Option<String>,
}

impl UpdateRequest {
    /// Parse a control payload. Blank payloads yield the empty request.
    pub fn parse(payload: &[u8]) -> serde_json::Result<Self> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.interval.is_none() && self.selection_mode.is_none()
    }

    /// Apply the requested reconfiguration to `metric`.
    pub fn apply(&self, metric: &dyn Metric) -> Result<(), MetricError> {
        if self.is_empty() {
            return Ok(());
        }

        let reconfigurable = metric
            .as_reconfigurable()
            .ok_or(MetricError::Unsupported("reconfiguration"))?;

        if let Some(interval) = self.interval {
            reconfigurable.set_interval(interval)?;
        }
        if let Some(mode) = &self.selection_mode {
            reconfigurable.set_selection_mode(mode)?;
        }
        Ok(())
    }
}

/// Handler for one metric's `update` and `stop` topics.
pub(crate) fn metric_handler(bridge: Weak<Bridge>, metric: MetricRef) -> MessageHandler {
    Arc::new(move |message: Message| {
        let Some(bridge) = bridge.upgrade() else {
            return;
        };

        match parse_control(&message.topic) {
            Some((_, Control::Update)) => bridge.handle_update(&metric, &message.payload),
            Some((_, Control::Stop)) => bridge.handle_stop(&metric),
            None => {
                tracing::debug!(topic = %message.topic, "Ignoring message on unknown control topic")
            }
        }
    })
}

/// Handler for `<base>/bridge/update` and `<base>/bridge/stop`.
pub(crate) fn bridge_handler(bridge: Weak<Bridge>) -> MessageHandler {
    Arc::new(move |message: Message| {
        let Some(bridge) = bridge.upgrade() else {
            return;
        };

        match parse_control(&message.topic) {
            Some((_, Control::Update)) => {
                tracing::info!("Bridge update requested");
                bridge.update_all();
            }
            Some((_, Control::Stop)) => {
                tracing::info!("Bridge stop requested");
                tokio::spawn(async move { bridge.stop().await });
            }
            None => {
                tracing::debug!(topic = %message.topic, "Ignoring message on unknown bridge topic")
            }
        }
    })
}
