//! Runtime configuration for the poll loop.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Serial device the counter is attached to (udev symlink).
pub const DEFAULT_DEVICE: &str = "/dev/cpm";
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Consecutive transport faults tolerated before the connection is re-opened.
pub const DEFAULT_RECONNECT_AFTER: u32 = 5;
pub const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8000);

/// Errors raised while building a [`PollConfig`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("poll interval must be positive, got {0:?}")]
    Interval(Duration),
    #[error("read timeout must be positive, got {0:?}")]
    ReadTimeout(Duration),
    #[error("baud rate must be positive")]
    BaudRate,
    #[error("reconnect threshold must be at least 1")]
    ReconnectAfter,
    #[error("device path is empty")]
    DevicePath,
}

/// What to do when the device connection cannot be (re-)established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Give up immediately and let the supervisor restart the process.
    FailFast,
    /// Keep trying, waiting `initial` after the first failure and doubling
    /// up to `max` between attempts.
    Retry { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub const fn retry() -> Self {
        ReconnectPolicy::Retry {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Immutable settings shared by the device reader and the poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    interval: Duration,
    device_path: String,
    baud_rate: u32,
    read_timeout: Duration,
    reconnect_after: u32,
    reconnect_policy: ReconnectPolicy,
}

impl PollConfig {
    /// Validate and build a configuration with the default reconnect settings.
    pub fn new(
        interval: Duration,
        device_path: impl Into<String>,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Interval(interval));
        }
        if read_timeout.is_zero() {
            return Err(ConfigError::ReadTimeout(read_timeout));
        }
        if baud_rate == 0 {
            return Err(ConfigError::BaudRate);
        }
        let device_path = device_path.into();
        if device_path.trim().is_empty() {
            return Err(ConfigError::DevicePath);
        }

        Ok(PollConfig {
            interval,
            device_path,
            baud_rate,
            read_timeout,
            reconnect_after: DEFAULT_RECONNECT_AFTER,
            reconnect_policy: ReconnectPolicy::FailFast,
        })
    }

    pub fn with_reconnect_after(mut self, faults: u32) -> Result<Self, ConfigError> {
        if faults == 0 {
            return Err(ConfigError::ReconnectAfter);
        }
        self.reconnect_after = faults;
        Ok(self)
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn reconnect_after(&self) -> u32 {
        self.reconnect_after
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect_policy
    }
}
