//! Ambient configuration (`§7`).
//!
//! One [`CoreConfig`] is built once per [`crate::commander::Commander`] and threaded down into
//! C1-C7's own config structs. Everything here has a sensible default; callers only override what
//! their driver or deployment needs.

use std::env;
use std::time::Duration;

use crate::navigation::NavigationConfig;
use crate::network::NetworkTrackerConfig;

/// The env var read once, at [`CoreConfig::from_env`] time, to decide the default tracing
/// directive. Unset or unrecognised values fall back to `info`.
pub const VERBOSE_ENV_VAR: &str = "BROWSER_COMMANDER_VERBOSE";

/// Top-level tunables for a [`crate::commander::Commander`]. `Serialize`/`Deserialize` so a
/// caller's own config file (TOML, JSON, whatever their binary already uses) can supply this
/// directly; this crate does not read config files itself.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CoreConfig {
    pub network: NetworkTrackerConfig,
    pub navigation: NavigationConfig,
    /// Deadline `Scheduler::stop_current_action` gives a running action to honor its
    /// `AbortToken` before it's considered wedged (`§5`).
    pub graceful_stop_deadline: Duration,
    /// Default tracing directive used by [`CoreConfig::tracing_directive`] unless overridden by
    /// [`VERBOSE_ENV_VAR`].
    pub default_tracing_directive: String,
}

impl CoreConfig {
    /// Read [`VERBOSE_ENV_VAR`] once and fold it into an otherwise-default config. The library
    /// itself never installs a subscriber; this only picks the directive a caller's own
    /// `tracing-subscriber` setup may want to honor.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(VERBOSE_ENV_VAR) {
            if !value.trim().is_empty() {
                config.default_tracing_directive = value;
            }
        }
        config
    }

    /// The directive this config recommends a caller's subscriber filter on.
    pub fn tracing_directive(&self) -> &str {
        &self.default_tracing_directive
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            network: NetworkTrackerConfig::lifecycle_integrated(),
            navigation: NavigationConfig::default(),
            graceful_stop_deadline: Duration::from_secs(10),
            default_tracing_directive: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_lifecycle_integrated_network_preset() {
        let config = CoreConfig::default();
        assert_eq!(config.network.idle_debounce, Duration::from_secs(30));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.graceful_stop_deadline, config.graceful_stop_deadline);
        assert_eq!(restored.default_tracing_directive, config.default_tracing_directive);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_falls_back_when_unset() {
        env::remove_var(VERBOSE_ENV_VAR);
        let config = CoreConfig::from_env();
        assert_eq!(config.tracing_directive(), "info");
    }
}
