//! # config
//!
//! why: keep the timing knobs of a node in one validated place
//! relations: consumed by timer.rs (RandomTimer) and by drivers that schedule replicate cycles
//! what: RaftConfig with defaults, validation and json loading

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Timing configuration, all values in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound (inclusive) of the randomized election timeout
    pub election_timeout_max: u64,
    /// How often a leader runs a replicate cycle
    pub heartbeat_interval: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
        }
    }
}

impl RaftConfig {
    /// Check the ranges a running cluster depends on.
    ///
    /// The heartbeat must fire well inside the shortest election timeout,
    /// otherwise followers of a healthy leader start elections.
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min == 0 {
            return Err(RaftError::InvalidConfig(
                "election_timeout_min must be positive".into(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval ({}) must be positive and below election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        Ok(())
    }

    /// Parse and validate a json document; missing fields take defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = RaftConfig::default();
        assert_eq!(config.election_timeout_min, 150);
        assert_eq!(config.election_timeout_max, 300);
        assert_eq!(config.heartbeat_interval, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let config = RaftConfig {
            election_timeout_min: 400,
            election_timeout_max: 200,
            heartbeat_interval: 50,
        };
        assert!(matches!(config.validate(), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn heartbeat_slower_than_election_is_rejected() {
        let config = RaftConfig {
            heartbeat_interval: 150,
            ..RaftConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = RaftConfig::from_json(r#"{"election_timeout_min": 200, "election_timeout_max": 400}"#)
            .unwrap();
        assert_eq!(config.election_timeout_min, 200);
        assert_eq!(config.election_timeout_max, 400);
        assert_eq!(config.heartbeat_interval, 50);
    }

    #[test]
    fn malformed_json_is_a_codec_error() {
        assert!(matches!(
            RaftConfig::from_json("{"),
            Err(RaftError::Codec(_))
        ));
    }
}
