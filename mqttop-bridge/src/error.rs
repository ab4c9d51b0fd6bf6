//! Error types for the bridge.

use thiserror::Error;

use crate::token::ClientError;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// The bridge was started without any metric.
    #[error("No metrics configured")]
    NoMetrics,

    /// The bridge is stopping and refuses new work.
    #[error("Bridge is shutting down")]
    ShuttingDown,

    /// Broker connection error.
    #[error("Broker connection error: {0}")]
    Connect(#[source] ClientError),

    /// Subscribing to a topic failed.
    #[error("Failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: ClientError,
    },

    /// Publishing to a topic failed.
    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: ClientError,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<mqttop_common::Error> for BridgeError {
    fn from(err: mqttop_common::Error) -> Self {
        Self::Config(err.to_string())
    }
}
