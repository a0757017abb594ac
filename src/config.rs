//! Gateway configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/gateway.toml` by default)
//! 2. environment variables prefixed with `SENSOR_GATEWAY_`, nested keys separated
//!    by a double underscore
//!
//! Every field has a default, so an empty file (or no file at all) yields a working
//! configuration.
//!
//! # Example
//! ```no_run
//! use sensor_gateway::config::GatewayConfig;
//!
//! # fn main() -> sensor_gateway::GatewayResult<()> {
//! // SENSOR_GATEWAY_RING__CAPACITY=4096 overrides ring.capacity
//! let config = GatewayConfig::load()?;
//! config.validate()?;
//! println!("Ring capacity: {}", config.ring.capacity);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SENSOR_GATEWAY_";

/// Accepted `application.log_level` values.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Ring buffer sizing
    pub ring: RingConfig,
    /// Read loop and recovery settings
    pub communicator: CommunicatorConfig,
    /// Translation stage settings
    pub translation: TranslationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sensor-gateway".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Pads per ring; the number of messages a consumer can fall behind before
    /// losing data.
    pub capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Read loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Reconnect attempts before a close-required error becomes fatal
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    /// Pause after a retryable error before reading again
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 3,
            reconnect_backoff: Duration::from_millis(100),
            retry_delay: Duration::ZERO,
            event_capacity: 64,
        }
    }
}

/// Translation stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// How long an idle stage sleeps before polling its upstream again
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables.
    pub fn load() -> GatewayResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path plus environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        Ok(Self::figment(Toml::file(path.as_ref())).extract()?)
    }

    /// Parse configuration from a TOML string plus environment variables.
    pub fn from_toml_str(toml: &str) -> GatewayResult<Self> {
        Ok(Self::figment(Toml::string(toml)).extract()?)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render the configuration as TOML (used to print a starting config).
    pub fn to_toml_string(&self) -> GatewayResult<String> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> GatewayResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.ring.capacity == 0 {
            return Err(GatewayError::Configuration(
                "ring.capacity must be at least 1".to_string(),
            ));
        }

        if self.communicator.event_capacity == 0 {
            return Err(GatewayError::Configuration(
                "communicator.event_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
