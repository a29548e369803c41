//! Configuration for the membership layer

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::recovery::RecoverySelectorMode;

/// Top-level membership configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Heartbeat and failure detection
    pub health: HealthConfig,
    /// Acknowledged multicast
    pub multicast: MulticastConfig,
    /// Key to member mapping
    pub key_mapper: KeyMapperConfig,
    /// Recovery target selection
    pub recovery: RecoveryConfig,
}

/// Heartbeat and failure detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Heartbeat period; also the detector scan period
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Whole heartbeat periods a peer may miss before it is suspected
    pub max_missed_beats: u32,
    /// Grace period the verifier waits before confirming a failure
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
    /// Extra slack added to the verify timeout
    #[serde(with = "humantime_serde")]
    pub verify_buffer: Duration,
    /// Delay before restarting a failed background loop
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            max_missed_beats: 3,
            verify_timeout: Duration::from_secs(10),
            verify_buffer: Duration::from_millis(500),
            restart_delay: Duration::from_secs(10),
        }
    }
}

impl HealthConfig {
    /// Time the verifier sleeps after a suspicion
    pub fn verify_wait(&self) -> Duration {
        self.verify_timeout + self.verify_buffer
    }
}

/// Acknowledged multicast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// How long a threshold send waits for acknowledgments
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Padding added to the ack timeout
    #[serde(with = "humantime_serde")]
    pub ack_padding: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(5000),
            ack_padding: Duration::from_millis(250),
        }
    }
}

impl MulticastConfig {
    /// Total wait for a threshold send
    pub fn total_timeout(&self) -> Duration {
        self.ack_timeout + self.ack_padding
    }
}

/// Key mapper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMapperConfig {
    /// Number of replica candidates recorded per member
    pub hop_count: usize,
}

impl Default for KeyMapperConfig {
    fn default() -> Self {
        Self { hop_count: 1 }
    }
}

/// Recovery selection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Selection algorithm; `None` uses the default
    pub mode: Option<RecoverySelectorMode>,
}

impl MembershipConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.health.heartbeat_interval.is_zero() {
            return Err(Error::Configuration(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        if self.health.max_missed_beats == 0 {
            return Err(Error::Configuration(
                "max_missed_beats must be at least 1".to_string(),
            ));
        }

        if self.health.restart_delay.is_zero() {
            return Err(Error::Configuration(
                "restart_delay must be greater than 0".to_string(),
            ));
        }

        if self.multicast.total_timeout().is_zero() {
            return Err(Error::Configuration(
                "ack_timeout must be greater than 0".to_string(),
            ));
        }

        if self.key_mapper.hop_count == 0 {
            return Err(Error::Configuration(
                "hop_count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
