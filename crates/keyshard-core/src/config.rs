use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, CustodyResult};

/// Custody parameters, validated eagerly at component construction.
///
/// An invalid configuration is fatal: constructors propagate the error and
/// nothing downstream runs with out-of-range shard arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Number of shards produced by a split (default: 3)
    pub total_shards: u8,
    /// Shards required to reconstruct (default: 2)
    pub threshold: u8,
    /// Lifetime of a reconstructed key handle in seconds (default: 300)
    pub key_ttl_secs: u64,
    /// Reconstruction attempts allowed per user per rolling hour (default: 10)
    pub max_attempts_per_hour: u32,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            total_shards: 3,
            threshold: 2,
            key_ttl_secs: 300,
            max_attempts_per_hour: 10,
        }
    }
}

impl CustodyConfig {
    pub fn validate(&self) -> CustodyResult<()> {
        if self.threshold < 2 {
            return Err(CustodyError::Configuration(
                "threshold must be at least 2".to_string(),
            ));
        }
        if self.total_shards < self.threshold {
            return Err(CustodyError::Configuration(format!(
                "total_shards {} is below threshold {}",
                self.total_shards, self.threshold
            )));
        }
        if self.total_shards > 10 {
            return Err(CustodyError::Configuration(format!(
                "total_shards {} exceeds the maximum of 10",
                self.total_shards
            )));
        }
        if self.max_attempts_per_hour == 0 {
            return Err(CustodyError::Configuration(
                "max_attempts_per_hour must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CustodyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_below_two_rejected() {
        let config = CustodyConfig {
            threshold: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CustodyError::Configuration(_))
        ));
    }

    #[test]
    fn test_threshold_above_total_rejected() {
        let config = CustodyConfig {
            total_shards: 3,
            threshold: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_total_shards_cap() {
        let config = CustodyConfig {
            total_shards: 11,
            threshold: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CustodyConfig {
            total_shards: 10,
            threshold: 10,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
