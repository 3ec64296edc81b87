//! Bus configuration.
//!
//! `BusConfig` is usually embedded in the host's TOML configuration under a
//! `[bus]` table; every field has a default so the table may be omitted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Handlers running longer than this are reported with a warning (0 disables)
    #[serde(default = "default_slow_handler_threshold_ms")]
    pub slow_handler_threshold_ms: u64,
    /// Warn instead of debug-log when a posted event reaches no subscriber
    #[serde(default)]
    pub warn_on_unhandled: bool,
    /// Upper bound on live subscriptions per plugin instance (0 = unlimited)
    #[serde(default)]
    pub max_subscriptions_per_plugin: usize,
}

fn default_slow_handler_threshold_ms() -> u64 {
    50
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            slow_handler_threshold_ms: default_slow_handler_threshold_ms(),
            warn_on_unhandled: false,
            max_subscriptions_per_plugin: 0,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slow_handler_threshold_ms > 60_000 {
            return Err(format!(
                "slow_handler_threshold_ms must be at most 60000, got {}",
                self.slow_handler_threshold_ms
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: BusConfig = toml::from_str("warn_on_unhandled = true").unwrap();

        assert_eq!(config.slow_handler_threshold_ms, 50);
        assert!(config.warn_on_unhandled);
        assert_eq!(config.max_subscriptions_per_plugin, 0);
    }

    #[test]
    fn validate_rejects_absurd_threshold() {
        let config = BusConfig {
            slow_handler_threshold_ms: 120_000,
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(BusConfig::default().validate().is_ok());
    }
}
