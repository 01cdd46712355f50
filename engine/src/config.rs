//! Engine configuration.

use crate::id::IdStrategy;
use std::env;

/// Per-collection engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How ids are produced for inserts without one
    pub id_strategy: IdStrategy,
    /// Reject undeclared field names on the partial update path
    pub strict_fields: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::Uuid,
            strict_fields: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let id_strategy = match env::var("TETHER_ID_STRATEGY") {
            Ok(v) => parse_strategy(&v)?,
            Err(_) => IdStrategy::default(),
        };

        let strict_fields = match env::var("TETHER_STRICT_FIELDS") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidStrictFields(v))?,
            Err(_) => true,
        };

        Ok(Self {
            id_strategy,
            strict_fields,
        })
    }

    /// Builder-style setter for the id strategy.
    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Builder-style setter for strict field checking.
    pub fn with_strict_fields(mut self, strict: bool) -> Self {
        self.strict_fields = strict;
        self
    }
}

fn parse_strategy(value: &str) -> Result<IdStrategy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "uuid" => Ok(IdStrategy::Uuid),
        "remote" => Ok(IdStrategy::Remote),
        _ => Err(ConfigError::InvalidIdStrategy(value.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid TETHER_ID_STRATEGY value: {0}")]
    InvalidIdStrategy(String),

    #[error("invalid TETHER_STRICT_FIELDS value: {0}")]
    InvalidStrictFields(String),
}
