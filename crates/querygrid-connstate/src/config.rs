//! Registry settings — eviction duration and housekeeping cadence.
//!
//! The eviction duration can be overridden per process through
//! `QUERYGRID_CONNECTION_STATE_EVICTION_SECS`, or per deployment through the
//! `[connection_state]` section of `querygrid.toml`.

use std::time::Duration;

use querygrid_core::config::ConnectionStateConfig;

/// Environment variable overriding the eviction duration, in seconds.
pub const EVICTION_DURATION_ENV: &str = "QUERYGRID_CONNECTION_STATE_EVICTION_SECS";

/// Default eviction duration: 5 minutes.
pub const DEFAULT_EVICTION_DURATION_SECS: u64 = 300;

/// Default housekeeping interval: once a minute.
pub const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 60;

/// Resolve the eviction duration (seconds) from the process environment.
pub fn resolve_eviction_duration() -> u64 {
    resolve_eviction_duration_from(std::env::var(EVICTION_DURATION_ENV).ok().as_deref())
}

/// Resolve the eviction duration (seconds) from an optional raw override.
///
/// Absent or unparseable values fall back to [`DEFAULT_EVICTION_DURATION_SECS`].
pub fn resolve_eviction_duration_from(raw: Option<&str>) -> u64 {
    match raw.map(str::trim) {
        None => {
            tracing::info!(
                eviction_secs = DEFAULT_EVICTION_DURATION_SECS,
                "using default connection state eviction duration"
            );
            DEFAULT_EVICTION_DURATION_SECS
        }
        Some(value) => match value.parse::<u64>() {
            Ok(secs) => {
                tracing::info!(
                    eviction_secs = secs,
                    "using non-default connection state eviction duration"
                );
                secs
            }
            Err(_) => {
                tracing::warn!(
                    value = %value,
                    eviction_secs = DEFAULT_EVICTION_DURATION_SECS,
                    "unparseable eviction duration override, using default"
                );
                DEFAULT_EVICTION_DURATION_SECS
            }
        },
    }
}

/// Settings for a registry and its housekeeper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Pools not re-registered for this long are evicted (default: 300s).
    pub eviction_duration: Duration,
    /// Period between housekeeping passes (default: 60s).
    pub housekeeping_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            eviction_duration: Duration::from_secs(DEFAULT_EVICTION_DURATION_SECS),
            housekeeping_interval: Duration::from_secs(DEFAULT_HOUSEKEEPING_INTERVAL_SECS),
        }
    }
}

impl RegistrySettings {
    /// Defaults, with the eviction duration taken from the environment.
    pub fn from_env() -> Self {
        Self {
            eviction_duration: Duration::from_secs(resolve_eviction_duration()),
            ..Self::default()
        }
    }

    /// Builder method: apply a `[connection_state]` TOML section on top.
    ///
    /// Only fields present in the section take effect.
    pub fn with_config(self, config: &ConnectionStateConfig) -> Self {
        Self {
            eviction_duration: config
                .eviction_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(self.eviction_duration),
            housekeeping_interval: config
                .housekeeping_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(self.housekeeping_interval),
        }
    }

    /// Housekeeping period, never shorter than one second.
    pub(crate) fn tick_period(&self) -> Duration {
        self.housekeeping_interval.max(Duration::from_secs(1))
    }
}
