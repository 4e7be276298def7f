//! Session cadence configuration.
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_AUTOSAVE_INTERVAL_MS, DEFAULT_BOOST_POLL_INTERVAL_MS, DEFAULT_CACHE_KEY_PREFIX,
    DEFAULT_TICK_INTERVAL_MS,
};

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
    #[error("cache key prefix must not be empty")]
    EmptyCachePrefix,
    #[error("config JSON invalid: {0}")]
    Parse(String),
}

/// Timer cadences and storage naming for one economy session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyConfig {
    #[serde(default = "EconomyConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "EconomyConfig::default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,
    #[serde(default = "EconomyConfig::default_boost_poll_interval_ms")]
    pub boost_poll_interval_ms: u64,
    #[serde(default = "EconomyConfig::default_cache_key_prefix")]
    pub cache_key_prefix: String,
}

impl EconomyConfig {
    const fn default_tick_interval_ms() -> u64 {
        DEFAULT_TICK_INTERVAL_MS
    }

    const fn default_autosave_interval_ms() -> u64 {
        DEFAULT_AUTOSAVE_INTERVAL_MS
    }

    const fn default_boost_poll_interval_ms() -> u64 {
        DEFAULT_BOOST_POLL_INTERVAL_MS
    }

    fn default_cache_key_prefix() -> String {
        DEFAULT_CACHE_KEY_PREFIX.to_string()
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a cadence is zero.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that every cadence is positive and the cache prefix is usable.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("tick_interval_ms", self.tick_interval_ms),
            ("autosave_interval_ms", self.autosave_interval_ms),
            ("boost_poll_interval_ms", self.boost_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if self.cache_key_prefix.is_empty() {
            return Err(ConfigError::EmptyCachePrefix);
        }
        Ok(())
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    #[must_use]
    pub const fn boost_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boost_poll_interval_ms)
    }

    /// Local cache key holding the reconciliation record for `player_id`.
    #[must_use]
    pub fn cache_key(&self, player_id: &str) -> String {
        format!("{}{player_id}", self.cache_key_prefix)
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval_ms(),
            autosave_interval_ms: Self::default_autosave_interval_ms(),
            boost_poll_interval_ms: Self::default_boost_poll_interval_ms(),
            cache_key_prefix: Self::default_cache_key_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadences() {
        let cfg = EconomyConfig::default();
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.autosave_interval(), Duration::from_secs(3));
        assert_eq!(cfg.boost_poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.cache_key("p-7"), "crumbforge.reconcile.p-7");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EconomyConfig::from_json(r#"{"autosave_interval_ms": 500}"#).unwrap();
        assert_eq!(cfg.autosave_interval_ms, 500);
        assert_eq!(cfg.tick_interval_ms, 1_000);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = EconomyConfig::from_json(r#"{"tick_interval_ms": 0}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroInterval {
                field: "tick_interval_ms"
            }
        );
        assert!(matches!(
            EconomyConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let cfg = EconomyConfig {
            cache_key_prefix: String::new(),
            ..EconomyConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyCachePrefix));
    }
}
