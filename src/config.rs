//! Dispatcher configuration.
//!
//! Values can be set in code through [`DispatcherConfigBuilder`] or loaded
//! from TOML:
//!
//! ```toml
//! time_wait_period_ms = 5000
//! max_time_wait_connections = 5000
//! max_reasonable_initial_packet_number = 100
//! stateless_reject_threshold = 1000
//! supported_versions = [2, 1]
//! ```
//!
//! Every key is optional; missing keys take the defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::core::{
    ConfigError, Version, DEFAULT_MAX_TIME_WAIT_CONNECTIONS, DEFAULT_TIME_WAIT_PERIOD,
    MAX_PACKET_NUMBER, MAX_REASONABLE_INITIAL_PACKET_NUMBER, MAX_TIME_WAIT_PERIOD,
    SUPPORTED_VERSIONS,
};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long a closed connection id stays in time-wait.
    pub time_wait_period: Duration,

    /// Maximum number of ids in time-wait. The oldest is evicted beyond this.
    pub max_time_wait_connections: usize,

    /// Highest packet number accepted on the first packet of a connection.
    pub max_reasonable_initial_packet_number: u64,

    /// Session count at which new sessions are told to reject statelessly.
    /// `None` disables stateless rejects.
    pub stateless_reject_threshold: Option<usize>,

    /// Supported versions, most preferred first.
    pub supported_versions: Vec<Version>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            time_wait_period: DEFAULT_TIME_WAIT_PERIOD,
            max_time_wait_connections: DEFAULT_MAX_TIME_WAIT_CONNECTIONS,
            max_reasonable_initial_packet_number: MAX_REASONABLE_INITIAL_PACKET_NUMBER,
            stateless_reject_threshold: None,
            supported_versions: SUPPORTED_VERSIONS.to_vec(),
        }
    }
}

impl DispatcherConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::new()
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_wait_period.is_zero() {
            return Err(invalid("time_wait_period", "must be greater than zero"));
        }
        if self.time_wait_period > MAX_TIME_WAIT_PERIOD {
            return Err(invalid(
                "time_wait_period",
                format!("must be at most {}s", MAX_TIME_WAIT_PERIOD.as_secs()),
            ));
        }
        if self.max_time_wait_connections == 0 {
            return Err(invalid("max_time_wait_connections", "must be at least 1"));
        }
        if self.max_reasonable_initial_packet_number == 0
            || self.max_reasonable_initial_packet_number > MAX_PACKET_NUMBER
        {
            return Err(invalid(
                "max_reasonable_initial_packet_number",
                format!("must be in 1..={MAX_PACKET_NUMBER}"),
            ));
        }
        if self.supported_versions.is_empty() {
            return Err(invalid("supported_versions", "must list at least one version"));
        }
        for (i, version) in self.supported_versions.iter().enumerate() {
            if self.supported_versions[..i].contains(version) {
                return Err(invalid(
                    "supported_versions",
                    format!("{version} is listed twice"),
                ));
            }
        }
        Ok(())
    }

    /// Preferred version, used when a client offers an unsupported one.
    pub fn preferred_version(&self) -> Option<Version> {
        self.supported_versions.first().copied()
    }

    /// Check if `version` is supported.
    pub fn supports(&self, version: Version) -> bool {
        self.supported_versions.contains(&version)
    }

    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(s)?;
        let defaults = Self::default();
        let config = Self {
            time_wait_period: raw
                .time_wait_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.time_wait_period),
            max_time_wait_connections: raw
                .max_time_wait_connections
                .unwrap_or(defaults.max_time_wait_connections),
            max_reasonable_initial_packet_number: raw
                .max_reasonable_initial_packet_number
                .unwrap_or(defaults.max_reasonable_initial_packet_number),
            stateless_reject_threshold: raw.stateless_reject_threshold,
            supported_versions: raw
                .supported_versions
                .unwrap_or(defaults.supported_versions),
        };
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// On-disk shape of [`DispatcherConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    time_wait_period_ms: Option<u64>,
    max_time_wait_connections: Option<usize>,
    max_reasonable_initial_packet_number: Option<u64>,
    stateless_reject_threshold: Option<usize>,
    supported_versions: Option<Vec<Version>>,
}

/// Builder for [`DispatcherConfig`].
#[derive(Debug)]
pub struct DispatcherConfigBuilder {
    config: DispatcherConfig,
}

impl DispatcherConfigBuilder {
    /// Create a builder holding the defaults.
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    /// Set the time-wait period.
    pub fn time_wait_period(mut self, period: Duration) -> Self {
        self.config.time_wait_period = period;
        self
    }

    /// Set the time-wait capacity.
    pub fn max_time_wait_connections(mut self, max: usize) -> Self {
        self.config.max_time_wait_connections = max;
        self
    }

    /// Set the highest acceptable initial packet number.
    pub fn max_reasonable_initial_packet_number(mut self, max: u64) -> Self {
        self.config.max_reasonable_initial_packet_number = max;
        self
    }

    /// Enable stateless rejects once `threshold` sessions are active.
    pub fn stateless_reject_threshold(mut self, threshold: usize) -> Self {
        self.config.stateless_reject_threshold = Some(threshold);
        self
    }

    /// Set the supported versions, most preferred first.
    pub fn supported_versions(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.config.supported_versions = versions.into_iter().collect();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<DispatcherConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for DispatcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
