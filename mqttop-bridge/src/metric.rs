//! Metric producer capability.
//!
//! A metric is an independently updating value with a stable topic and a
//! kind label. The bridge drives it through [`Metric`]; the optional
//! [`Discoverer`] and [`Reconfigurable`] capabilities are queried explicitly
//! with [`Metric::as_discoverer`] and [`Metric::as_reconfigurable`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::Discovery;

/// Shared handle to a metric.
pub type MetricRef = Arc<dyn Metric>;

/// Receiving end of a metric's outcome stream.
pub type OutcomeReceiver = mpsc::Receiver<Outcome>;

/// Result of one metric update, pushed by the producer.
#[derive(Debug)]
pub enum Outcome {
    /// The value changed and should be published.
    Updated,
    /// The value was refreshed but is identical to the last one.
    Unchanged,
    /// The set of sub-entities changed; discovery must be redone.
    TopologyChanged,
    /// The update failed.
    Failed(MetricError),
}

/// Errors raised by metric producers.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric is already started")]
    AlreadyStarted,

    #[error("metric is not started")]
    NotStarted,

    #[error("failed to start: {0}")]
    Start(String),

    #[error("failed to sample: {0}")]
    Sample(String),

    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid interval {0:?}")]
    Interval(Duration),

    #[error("unknown selection mode '{0}'")]
    SelectionMode(String),

    #[error("{0} is not supported by this metric")]
    Unsupported(&'static str),
}

/// Lifecycle and reporting contract of a metric producer.
pub trait Metric: Send + Sync + 'static {
    /// Topic the value is published to. Empty topics are never loaded.
    fn topic(&self) -> &str;

    /// Producer type label, e.g. `"cpu"`. Also names the discovery node.
    fn kind(&self) -> &str;

    /// Start the producer and hand over its outcome stream.
    ///
    /// The stream ends (the sender is dropped) when the metric is stopped or
    /// `cancel` fires.
    fn start(&self, cancel: CancellationToken) -> Result<OutcomeReceiver, MetricError>;

    /// Stop the producer. Idempotent.
    fn stop(&self);

    /// Refresh now; the result arrives on the outcome stream.
    fn update(&self) -> Result<(), MetricError>;

    /// Append the current value's wire text to `buf`.
    fn append_text(&self, buf: &mut Vec<u8>) -> Result<(), MetricError>;

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        None
    }

    fn as_reconfigurable(&self) -> Option<&dyn Reconfigurable> {
        None
    }
}

/// Contributes component descriptions to a discovery document.
pub trait Discoverer {
    fn discover(&self, doc: &mut Discovery);
}

/// Runtime reconfiguration through the `<topic>/update` control message.
pub trait Reconfigurable {
    fn set_interval(&self, interval: Duration) -> Result<(), MetricError>;

    fn set_selection_mode(&self, mode: &str) -> Result<(), MetricError> {
        let _ = mode;
        Err(MetricError::Unsupported("selection mode"))
    }
}
