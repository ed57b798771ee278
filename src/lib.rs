//! `geiger-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signal
//! handling and process exit codes. The poll/parse/publish loop lives in
//! [`crate::poller`] and talks to the device and the metric sink only through
//! the [`Connector`] and [`CpmSink`] traits, so it can be tested without
//! hardware or a network port.

pub mod app;
pub mod backoff;
pub mod config;
pub mod device;
pub mod interval;
pub mod metrics;
pub mod poller;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Options, RunError};
pub use config::{ConfigError, PollConfig, ReconnectPolicy};
pub use device::{
    ConnectError, Connection, Connector, Cpm, DeviceError, GETCPM_REQUEST, SerialConnector,
    Transport, query,
};
pub use interval::parse_interval;
pub use metrics::{CpmSink, PrometheusSink, SinkError};
pub use poller::{PollLoop, PollStats};
