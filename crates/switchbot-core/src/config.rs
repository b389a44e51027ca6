//! Tunables for a single device client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 2;

/// Default scan duration when refreshing from broadcasts.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an idle connection is held open for follow-up commands.
pub const DEFAULT_DISCONNECT_DELAY: Duration = Duration::from_millis(8_500);

/// Per-attempt wait for the reply notification.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before retrying after a bus error.
pub const DEFAULT_BUS_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Passive devices are polled at most this often.
pub const DEFAULT_PASSIVE_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);

/// Default timeout for establishing a BLE connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for connection lifetime, retries and polling.
///
/// Durations are (de)serialized as fractional seconds so a TOML file can say
/// `disconnect_delay = 8.5`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use switchbot_core::DeviceConfig;
///
/// let config = DeviceConfig::default()
///     .retry_count(4)
///     .disconnect_delay(Duration::from_secs(20));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Retries after the first attempt (attempts = retry_count + 1).
    pub retry_count: u32,
    /// Scan duration for discovery passes.
    #[serde(with = "duration_secs")]
    pub scan_timeout: Duration,
    /// Idle time before the connection is dropped.
    #[serde(with = "duration_secs")]
    pub disconnect_delay: Duration,
    /// Wait for a reply notification, per attempt.
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,
    /// Backoff before retrying after a bus error.
    #[serde(with = "duration_secs")]
    pub bus_error_backoff: Duration,
    /// Passive polling interval.
    #[serde(with = "duration_secs")]
    pub passive_poll_interval: Duration,
    /// Timeout for establishing a connection.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            disconnect_delay: DEFAULT_DISCONNECT_DELAY,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            bus_error_backoff: DEFAULT_BUS_ERROR_BACKOFF,
            passive_poll_interval: DEFAULT_PASSIVE_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl DeviceConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for challenging RF environments.
    ///
    /// More retries and longer waits for devices behind walls or at the
    /// edge of range.
    pub fn challenging_environment() -> Self {
        Self {
            retry_count: 4,
            command_timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(25),
            ..Self::default()
        }
    }

    /// Set the retry count.
    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the idle disconnect delay.
    #[must_use]
    pub fn disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    /// Set the per-attempt reply timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the bus error backoff.
    #[must_use]
    pub fn bus_error_backoff(mut self, backoff: Duration) -> Self {
        self.bus_error_backoff = backoff;
        self
    }

    /// Set the passive poll interval.
    #[must_use]
    pub fn passive_poll_interval(mut self, interval: Duration) -> Self {
        self.passive_poll_interval = interval;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Number of attempts a command gets.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Reject configurations that would stall or spin.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("scan_timeout", self.scan_timeout),
            ("disconnect_delay", self.disconnect_delay),
            ("command_timeout", self.command_timeout),
            ("passive_poll_interval", self.passive_poll_interval),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in checks {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
