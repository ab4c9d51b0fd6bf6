//! mqttop Common Library
//!
//! This crate provides shared types and utilities for the mqttop bridge:
//!
//! - [`config`] - Configuration sections and JSON5 loading
//! - [`topic`] - Topic builders, control-topic parsing and filter matching
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{
    DiscoveryConfig, LastWillConfig, LogFormat, LoggingConfig, MqttConfig, QoS, load_config,
    parse_config,
};
pub use error::{Error, Result};
pub use topic::{BASE_TOPIC, Control, TopicBuilder, discovery_topic, parse_control};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use mqttop_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
