//! Configuration for the hub.

use std::env;
use std::time::Duration;

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Simulated round-trip delay before each call resolves
    pub latency: Duration,
    /// Whether the session that wrote also receives the resulting event
    pub echo_to_origin: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            echo_to_origin: true,
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let latency = match env::var("TETHER_HUB_LATENCY_MS") {
            Ok(v) => parse_latency(&v)?,
            Err(_) => Duration::ZERO,
        };

        let echo_to_origin = match env::var("TETHER_HUB_ECHO") {
            Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidEcho(v))?,
            Err(_) => true,
        };

        Ok(Self {
            latency,
            echo_to_origin,
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_echo_to_origin(mut self, echo: bool) -> Self {
        self.echo_to_origin = echo;
        self
    }
}

fn parse_latency(value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidLatency(value.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid TETHER_HUB_LATENCY_MS value: {0}")]
    InvalidLatency(String),

    #[error("invalid TETHER_HUB_ECHO value: {0}")]
    InvalidEcho(String),
}
