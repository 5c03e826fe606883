//! Pool configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) fn get_log_level() -> &'static str {
    match log::max_level() {
        log::LevelFilter::Error => "error",
        log::LevelFilter::Warn => "warning",
        log::LevelFilter::Info => "info",
        log::LevelFilter::Debug => "debug",
        log::LevelFilter::Trace => "trace",
        log::LevelFilter::Off => "critical",
    }
}

/// A unit of time for a [`TimeSpec`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Min,
    Sec,
    Ms,
    Mu,
}

/// A `{n, unit}` duration specification as read from configuration.
///
/// `n == 0` means "disabled" wherever a `TimeSpec` gates an optional
/// feature (cull interval, max age).
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct TimeSpec {
    pub n: u64,
    pub unit: TimeUnit,
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self {
            n: 0,
            unit: TimeUnit::Min,
        }
    }
}

impl TimeSpec {
    pub fn new(n: u64, unit: TimeUnit) -> Self {
        Self { n, unit }
    }

    /// Returns `true` if this spec represents a disabled feature (`n == 0`).
    pub fn is_disabled(&self) -> bool {
        self.n == 0
    }

    /// Convert to microseconds using the multipliers from the configuration
    /// schema: minute -> 60*10^6, second -> 10^6, millisecond -> 10^3, microsecond -> 1.
    pub fn as_micros(&self) -> u64 {
        let factor = match self.unit {
            TimeUnit::Min => 60_000_000,
            TimeUnit::Sec => 1_000_000,
            TimeUnit::Ms => 1_000,
            TimeUnit::Mu => 1,
        };
        self.n.saturating_mul(factor)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.as_micros())
    }
}

const DEFAULT_ADD_MEMBER_RETRY: usize = 1;

/// Configuration for a single named pool.
///
/// Mirrors the configuration schema described for the external
/// configuration loader: a flat, serde-deserializable record with
/// sensible defaults for everything but `name` and `start_mfa`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Unique identifier for the pool.
    pub name: String,
    /// Absolute ceiling on total workers (free + in-use).
    pub max_count: usize,
    /// Target population floor maintained after culling.
    pub init_count: usize,
    /// Opaque descriptor passed to the [`crate::WorkerFactory`] to spawn a
    /// worker for this pool. Named `start_mfa` to match the configuration
    /// vocabulary of the systems this crate generalizes.
    #[serde(rename = "start_mfa")]
    pub factory_descriptor: serde_json::Value,
    /// Growth attempts during a single take when the pool is empty but
    /// below `max_count`. Should be >= 2 to tolerate one spawn failure.
    pub add_member_retry: usize,
    /// `{0, _}` disables culling.
    pub cull_interval: TimeSpec,
    /// A free worker idle longer than this is eligible for culling.
    pub max_age: TimeSpec,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_count: 0,
            init_count: 0,
            factory_descriptor: serde_json::Value::Null,
            add_member_retry: DEFAULT_ADD_MEMBER_RETRY,
            cull_interval: TimeSpec::default(),
            max_age: TimeSpec::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, factory_descriptor: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            factory_descriptor,
            ..Default::default()
        }
    }

    pub fn max_count(mut self, value: usize) -> Self {
        self.max_count = value;
        self
    }

    pub fn init_count(mut self, value: usize) -> Self {
        self.init_count = value;
        self
    }

    pub fn add_member_retry(mut self, value: usize) -> Self {
        self.add_member_retry = value;
        self
    }

    pub fn cull_interval(mut self, value: TimeSpec) -> Self {
        self.cull_interval = value;
        self
    }

    pub fn max_age(mut self, value: TimeSpec) -> Self {
        self.max_age = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_spec_conversion() {
        assert_eq!(TimeSpec::new(2, TimeUnit::Min).as_micros(), 120_000_000);
        assert_eq!(TimeSpec::new(50, TimeUnit::Ms).as_micros(), 50_000);
        assert!(TimeSpec::default().is_disabled());
    }

    #[test]
    fn test_pool_config_from_json() {
        let cfg: PoolConfig = serde_json::from_value(serde_json::json!({
            "name": "p",
            "max_count": 3,
            "init_count": 2,
            "start_mfa": {"kind": "demo"},
        }))
        .unwrap();
        assert_eq!(cfg.name, "p");
        assert_eq!(cfg.add_member_retry, DEFAULT_ADD_MEMBER_RETRY);
        assert!(cfg.cull_interval.is_disabled());
    }

}
