//! Process-level wiring: CLI options, startup ordering and the top-level
//! error type.
//!
//! Kept separate from `main.rs` so the ordering guarantees (configuration is
//! validated before the metrics port is bound, and the port is bound before
//! the device is opened) can be tested without spawning a process.

use crate::config::{
    ConfigError, DEFAULT_BAUD_RATE, DEFAULT_DEVICE, DEFAULT_INTERVAL, DEFAULT_LISTEN,
    DEFAULT_READ_TIMEOUT, DEFAULT_RECONNECT_AFTER, PollConfig, ReconnectPolicy,
};
use crate::device::{ConnectError, Connector, SerialConnector};
use crate::metrics::{self, PrometheusSink, SinkError};
use crate::poller::{PollLoop, PollStats};
use clap::Parser;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Poll a Geiger counter over serial and expose its CPM as a Prometheus gauge.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Seconds between readings. Fractions and the suffixes ms, s, m, h are accepted.
    #[arg(
        value_name = "INTERVAL",
        default_value = "60",
        value_parser = crate::interval::parse_interval,
        allow_negative_numbers = true
    )]
    pub interval: Duration,

    /// Serial device the counter is attached to.
    #[arg(long, default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Serial line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// How long to wait for the device to answer a request.
    #[arg(long, default_value = "3s", value_parser = crate::interval::parse_interval)]
    pub read_timeout: Duration,

    /// Address the metrics endpoint listens on.
    #[arg(long, default_value_t = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Consecutive transport faults before the device is re-opened.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_AFTER)]
    pub reconnect_after: u32,

    /// Keep retrying with backoff when the device cannot be opened instead of exiting.
    #[arg(long)]
    pub retry_connect: bool,

    /// Verbose output, include debug events in the log
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            interval: DEFAULT_INTERVAL,
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            listen: DEFAULT_LISTEN,
            reconnect_after: DEFAULT_RECONNECT_AFTER,
            retry_connect: false,
            verbose: false,
        }
    }
}

impl Options {
    /// Validate the options into an immutable [`PollConfig`].
    pub fn poll_config(&self) -> Result<PollConfig, ConfigError> {
        let policy = if self.retry_connect {
            ReconnectPolicy::retry()
        } else {
            ReconnectPolicy::FailFast
        };
        Ok(PollConfig::new(
            self.interval,
            self.device.as_str(),
            self.baud_rate,
            self.read_timeout,
        )?
        .with_reconnect_after(self.reconnect_after)?
        .with_reconnect_policy(policy))
    }
}

/// Fatal errors; every variant maps to exit status 1.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("unable to establish connection to the Geiger counter: {0}")]
    Connect(#[from] ConnectError),
}

/// Start the exporter against the serial device named in `options`.
///
/// # Errors
/// See [`run_with_connector`].
pub async fn run<S>(options: Options, shutdown: S) -> Result<PollStats, RunError>
where
    S: Future<Output = ()>,
{
    run_with_connector(options, shutdown, |config| {
        SerialConnector::new(config.device_path(), config.baud_rate())
    })
    .await
}

/// Start the exporter with a caller supplied connector.
///
/// Steps run strictly in order, each only after the previous succeeded:
/// 1. Validate options into a [`PollConfig`]
/// 2. Register the gauge and bind the metrics listener
/// 3. Build the connector and hand over to the [`PollLoop`]
///
/// # Arguments
/// * `options` - Parsed command-line options
/// * `shutdown` - Future that resolves when the process should stop
/// * `make_connector` - Builds the device connector from the validated config
///
/// # Errors
/// * [`RunError::Config`] if the options are invalid; nothing has been started
/// * [`RunError::Sink`] if the metrics port cannot be bound; the device was not touched
/// * [`RunError::Connect`] if the device cannot be (re-)opened under the policy
pub async fn run_with_connector<S, C, F>(
    options: Options,
    shutdown: S,
    make_connector: F,
) -> Result<PollStats, RunError>
where
    S: Future<Output = ()>,
    C: Connector,
    F: FnOnce(&PollConfig) -> C,
{
    let config = options.poll_config()?;
    info!(
        device = config.device_path(),
        baud_rate = config.baud_rate(),
        interval = ?config.interval(),
        read_timeout = ?config.read_timeout(),
        "Starting geiger exporter"
    );

    let sink = PrometheusSink::new()?;
    let listener = metrics::bind(options.listen).await?;
    info!(listen = %options.listen, "Serving metrics");
    let server = metrics::spawn_server(listener, sink.router());

    let connector = make_connector(&config);
    let result = PollLoop::new(&config, &connector, &sink).run(shutdown).await;
    server.abort();

    Ok(result?)
}

/// Register the shutdown signal handlers and return a future resolving on
/// the first SIGINT, or SIGTERM on Unix.
///
/// Handlers are installed when this is called, not when the future is first
/// polled, so a signal that arrives during startup is not lost to the
/// default handler.
///
/// # Errors
/// Returns an `io::Error` if a handler cannot be registered.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        info!("Shutdown requested");
    })
}

/// Register the Ctrl-C handler and return a future resolving on it.
///
/// # Errors
/// Returns an `io::Error` if the handler cannot be registered.
#[cfg(not(unix))]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut interrupt = tokio::signal::windows::ctrl_c()?;
    Ok(async move {
        interrupt.recv().await;
        info!("Shutdown requested");
    })
}
