//!
//! Daemon configuration: a `config`-crate loader over a TOML file,
//! overridable by `CONF_`-prefixed, `__`-separated environment variables.
//! The Coordinator itself only ever consumes the resulting
//! `Vec<PoolConfig>`.
//!
use crate::logger::Logging;
use respool::config::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Daemon-level knobs that don't belong to any one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Daemon {
    /// How often the status report is printed, in seconds.
    pub status_interval: u64,
    /// Time allowed for in-flight requests to drain on shutdown.
    pub shutdown_grace_period: u64,
}

impl Default for Daemon {
    fn default() -> Self {
        Self {
            status_interval: 10,
            shutdown_grace_period: 5,
        }
    }
}

impl Daemon {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period)
    }
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: Logging,
    pub daemon: Daemon,
    pub pools: Vec<PoolConfig>,
}

impl Settings {
    pub fn init_logger(&self) {
        self.logging.init();
    }

    fn build(
        settings: config::builder::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let s = settings
            .add_source(
                config::Environment::with_prefix("conf")
                    .prefix_separator("_")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?;
        s.try_deserialize()
    }

    /// Create from defaults and environment variables alone.
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::build(config::Config::builder())
    }

    /// Load configuration from a TOML file, overridden by the environment.
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        Self::build(config::Config::builder().add_source(config::File::from(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let settings: Settings = Settings::new().unwrap();
        assert!(settings.pools.is_empty());
        assert_eq!(settings.daemon.status_interval, 10);
    }
}
