//! Network configuration.
//!
//! Loaded once at startup and shared read-only (`Arc<NetworkConfig>`) by all
//! layers. With the `config` feature the struct can be read from TOML using
//! the upper snake-case keys of the classic CoAP property files:
//!
//! ```toml
//! NSTART = 1
//! ACK_TIMEOUT = 2000            # ms
//! ACK_RANDOM_FACTOR = 1.5
//! ACK_TIMEOUT_SCALE = 2.0
//! MAX_RETRANSMIT = 4
//! USE_CONGESTION_CONTROL = true
//! CONGESTION_CONTROL_ALGORITHM = "Cocoa"
//! ```

use std::fmt;
use std::time::Duration;

use crate::core::constants;
use crate::core::ConfigError;

/// Selects the RTO estimator used by the congestion control layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(from = "String"))]
pub enum CongestionControlAlgorithm {
    /// Plain CoAP: the RTO is always `ACK_TIMEOUT`.
    None,
    /// CoCoA with strong and weak estimators.
    #[default]
    Cocoa,
    /// CoCoA using the strong estimator only.
    CocoaStrong,
    /// RTO = 1.5 × last RTT.
    BasicRto,
    /// Linux TCP style RTO.
    LinuxRto,
    /// Peakhopper RTO.
    PeakhopperRto,
}

impl CongestionControlAlgorithm {
    /// Registered names, in lookup order.
    pub const ALL: [CongestionControlAlgorithm; 6] = [
        CongestionControlAlgorithm::None,
        CongestionControlAlgorithm::Cocoa,
        CongestionControlAlgorithm::CocoaStrong,
        CongestionControlAlgorithm::BasicRto,
        CongestionControlAlgorithm::LinuxRto,
        CongestionControlAlgorithm::PeakhopperRto,
    ];

    /// Look up an algorithm by its configuration name.
    ///
    /// Unknown names fall back to [`Cocoa`](Self::Cocoa) with a warning.
    pub fn from_name(name: &str) -> Self {
        match Self::ALL.iter().find(|algorithm| algorithm.name() == name) {
            Some(algorithm) => *algorithm,
            None => {
                let fallback = Self::default();
                tracing::warn!(
                    algorithm = name,
                    fallback = fallback.name(),
                    "unknown CONGESTION_CONTROL_ALGORITHM"
                );
                fallback
            }
        }
    }

    /// Configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            CongestionControlAlgorithm::None => "None",
            CongestionControlAlgorithm::Cocoa => "Cocoa",
            CongestionControlAlgorithm::CocoaStrong => "CocoaStrong",
            CongestionControlAlgorithm::BasicRto => "BasicRto",
            CongestionControlAlgorithm::LinuxRto => "LinuxRto",
            CongestionControlAlgorithm::PeakhopperRto => "PeakhopperRto",
        }
    }
}

impl From<String> for CongestionControlAlgorithm {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl fmt::Display for CongestionControlAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "config")]
fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Transmission and congestion control parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(
    feature = "config",
    serde(rename_all = "SCREAMING_SNAKE_CASE", default, deny_unknown_fields)
)]
pub struct NetworkConfig {
    /// Outstanding confirmable exchanges per peer.
    pub nstart: u32,

    /// Base retransmission timeout.
    #[cfg_attr(feature = "config", serde(deserialize_with = "millis"))]
    pub ack_timeout: Duration,

    /// Upper bound multiplier for dithering.
    pub ack_random_factor: f64,

    /// Default backoff factor (VBF).
    pub ack_timeout_scale: f64,

    /// Retransmissions before an exchange fails.
    pub max_retransmit: u32,

    /// Ceiling for any retransmission timeout.
    #[cfg_attr(feature = "config", serde(deserialize_with = "millis"))]
    pub max_rto: Duration,

    /// Capacity of each per-peer queue.
    pub exchange_limit: usize,

    /// Non-confirmables in a row before one is promoted.
    pub max_successive_nons: u32,

    /// Lifetime of per-exchange bookkeeping before it is swept.
    #[cfg_attr(feature = "config", serde(deserialize_with = "millis"))]
    pub max_transaction_duration: Duration,

    /// Put the congestion control layer on top of the reliability layer.
    pub use_congestion_control: bool,

    /// RTO estimator for the congestion control layer.
    pub congestion_control_algorithm: CongestionControlAlgorithm,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nstart: constants::NSTART,
            ack_timeout: constants::ACK_TIMEOUT,
            ack_random_factor: constants::ACK_RANDOM_FACTOR,
            ack_timeout_scale: constants::ACK_TIMEOUT_SCALE,
            max_retransmit: constants::MAX_RETRANSMIT,
            max_rto: constants::MAX_RTO,
            exchange_limit: constants::EXCHANGE_LIMIT,
            max_successive_nons: constants::MAX_SUCCESSIVE_NONS,
            max_transaction_duration: constants::MAX_TRANSACTION_DURATION,
            use_congestion_control: false,
            congestion_control_algorithm: CongestionControlAlgorithm::default(),
        }
    }
}

impl NetworkConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::new()
    }

    /// Check that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nstart == 0 {
            return Err(ConfigError::Invalid("NSTART must be at least 1".into()));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Invalid("ACK_TIMEOUT must be positive".into()));
        }
        if self.ack_random_factor.is_nan() || self.ack_random_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "ACK_RANDOM_FACTOR must be at least 1.0, got {}",
                self.ack_random_factor
            )));
        }
        if self.ack_timeout_scale.is_nan() || self.ack_timeout_scale < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "ACK_TIMEOUT_SCALE must be at least 1.0, got {}",
                self.ack_timeout_scale
            )));
        }
        if self.max_rto < self.ack_timeout {
            return Err(ConfigError::Invalid(
                "MAX_RTO must not be below ACK_TIMEOUT".into(),
            ));
        }
        if self.exchange_limit == 0 {
            return Err(ConfigError::Invalid(
                "EXCHANGE_LIMIT must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    #[cfg(feature = "config")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    #[cfg(feature = "config")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Builder for [`NetworkConfig`].
#[derive(Debug, Default)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set NSTART.
    pub fn nstart(mut self, nstart: u32) -> Self {
        self.config.nstart = nstart;
        self
    }

    /// Set ACK_TIMEOUT.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set ACK_RANDOM_FACTOR.
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.config.ack_random_factor = factor;
        self
    }

    /// Set ACK_TIMEOUT_SCALE.
    pub fn ack_timeout_scale(mut self, scale: f64) -> Self {
        self.config.ack_timeout_scale = scale;
        self
    }

    /// Set MAX_RETRANSMIT.
    pub fn max_retransmit(mut self, max: u32) -> Self {
        self.config.max_retransmit = max;
        self
    }

    /// Set MAX_RTO.
    pub fn max_rto(mut self, max: Duration) -> Self {
        self.config.max_rto = max;
        self
    }

    /// Set the per-peer queue capacity.
    pub fn exchange_limit(mut self, limit: usize) -> Self {
        self.config.exchange_limit = limit;
        self
    }

    /// Set how many NONs may be sent in a row.
    pub fn max_successive_nons(mut self, max: u32) -> Self {
        self.config.max_successive_nons = max;
        self
    }

    /// Set the sweep delay.
    pub fn max_transaction_duration(mut self, duration: Duration) -> Self {
        self.config.max_transaction_duration = duration;
        self
    }

    /// Enable or disable the congestion control layer.
    pub fn congestion_control(mut self, enabled: bool) -> Self {
        self.config.use_congestion_control = enabled;
        self
    }

    /// Pick the RTO estimator.
    pub fn algorithm(mut self, algorithm: CongestionControlAlgorithm) -> Self {
        self.config.congestion_control_algorithm = algorithm;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.nstart, 1);
        assert_eq!(config.ack_timeout, Duration::from_millis(2000));
        assert_eq!(config.max_retransmit, 4);
        assert_eq!(config.exchange_limit, 50);
        assert_eq!(config.max_transaction_duration, Duration::from_secs(255));
        assert_eq!(
            config.congestion_control_algorithm,
            CongestionControlAlgorithm::Cocoa
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_algorithm_names() {
        for algorithm in CongestionControlAlgorithm::ALL {
            assert_eq!(CongestionControlAlgorithm::from_name(algorithm.name()), algorithm);
        }
    }

    #[test]
    fn test_unknown_algorithm_falls_back() {
        assert_eq!(
            CongestionControlAlgorithm::from_name("Reno"),
            CongestionControlAlgorithm::Cocoa
        );
    }

    #[test]
    fn test_builder_validates() {
        assert!(NetworkConfig::builder().nstart(0).build().is_err());
        assert!(NetworkConfig::builder().ack_random_factor(0.5).build().is_err());
        assert!(NetworkConfig::builder().ack_timeout_scale(0.9).build().is_err());
        assert!(NetworkConfig::builder().exchange_limit(0).build().is_err());
        assert!(
            NetworkConfig::builder()
                .ack_timeout(Duration::from_secs(90))
                .build()
                .is_err()
        );

        let config = NetworkConfig::builder()
            .nstart(2)
            .ack_timeout(Duration::from_millis(1000))
            .congestion_control(true)
            .algorithm(CongestionControlAlgorithm::LinuxRto)
            .build()
            .unwrap();
        assert_eq!(config.nstart, 2);
        assert!(config.use_congestion_control);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_toml() {
        let config = NetworkConfig::from_toml_str(
            r#"
            NSTART = 2
            ACK_TIMEOUT = 1000
            ACK_RANDOM_FACTOR = 1.25
            USE_CONGESTION_CONTROL = true
            CONGESTION_CONTROL_ALGORITHM = "PeakhopperRto"
            "#,
        )
        .unwrap();

        assert_eq!(config.nstart, 2);
        assert_eq!(config.ack_timeout, Duration::from_millis(1000));
        assert_eq!(config.ack_random_factor, 1.25);
        assert!(config.use_congestion_control);
        assert_eq!(
            config.congestion_control_algorithm,
            CongestionControlAlgorithm::PeakhopperRto
        );
        // Unset keys keep their defaults
        assert_eq!(config.max_retransmit, 4);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_toml_unknown_algorithm() {
        let config =
            NetworkConfig::from_toml_str(r#"CONGESTION_CONTROL_ALGORITHM = "Vegas""#).unwrap();
        assert_eq!(
            config.congestion_control_algorithm,
            CongestionControlAlgorithm::Cocoa
        );
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(matches!(
            NetworkConfig::from_toml_str("NSTART = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NetworkConfig::from_toml_str("NSTART = \"one\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
