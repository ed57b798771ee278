//! The poll/publish loop.
//!
//! [`PollLoop::run`] moves through four states:
//!
//! - **Connecting**: open the device. Failure is fatal under
//!   [`ReconnectPolicy::FailFast`]; under [`ReconnectPolicy::Retry`] it is
//!   retried with capped exponential backoff.
//! - **Running**: on every interval tick perform one [`device::query`].
//!   Successful readings are published to the sink; failed ones are logged and
//!   leave the published value untouched.
//! - **Reconnecting**: entered after `reconnect_after` consecutive transport
//!   faults. The connection is dropped and re-opened following the same
//!   policy as Connecting.
//! - **Terminal**: the shutdown future resolved. Any pending wait is
//!   abandoned, the connection is released and `run` returns `Ok`.

use crate::backoff::Backoff;
use crate::config::{PollConfig, ReconnectPolicy};
use crate::device::{self, ConnectError, Connection, Connector, DeviceError};
use crate::metrics::CpmSink;
use std::future::Future;
use std::pin::{Pin, pin};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters describing what a finished loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub published: u64,
    pub short_reads: u64,
    pub transport_faults: u64,
    pub reconnects: u64,
}

/// Drives periodic sampling of one device into one sink.
pub struct PollLoop<'a> {
    config: &'a PollConfig,
    connector: &'a dyn Connector,
    sink: &'a dyn CpmSink,
}

impl<'a> PollLoop<'a> {
    pub fn new(
        config: &'a PollConfig,
        connector: &'a dyn Connector,
        sink: &'a dyn CpmSink,
    ) -> Self {
        PollLoop {
            config,
            connector,
            sink,
        }
    }

    /// Poll until `shutdown` resolves.
    ///
    /// # Arguments
    /// * `shutdown` - Future whose completion moves the loop to Terminal,
    ///   abandoning any connect, exchange or sleep in progress
    ///
    /// # Errors
    /// Per-poll failures never escape. Returns `ConnectError` only when the
    /// connection could not be (re-)established under the configured policy.
    pub async fn run<S>(&self, shutdown: S) -> Result<PollStats, ConnectError>
    where
        S: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        let mut stats = PollStats::default();

        let Some(mut conn) = self.establish(shutdown.as_mut()).await? else {
            info!("Exiting gracefully");
            return Ok(stats);
        };
        info!(
            device = self.connector.describe(),
            interval = ?self.config.interval(),
            "Connected to Geiger counter, starting data collection"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_faults: u32 = 0;

        loop {
            tokio::select! {
                biased;
                () = shutdown.as_mut() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                () = shutdown.as_mut() => break,
                outcome = device::query(conn.as_mut(), self.config.read_timeout()) => outcome,
            };
            stats.polls += 1;

            match outcome {
                Ok(cpm) => {
                    consecutive_faults = 0;
                    self.sink.set(cpm);
                    stats.published += 1;
                    info!(cpm = cpm.value(), "CPM: {}", cpm);
                }
                Err(err @ DeviceError::ShortRead { .. }) => {
                    stats.short_reads += 1;
                    warn!(%err, "Failed to retrieve valid data from the Geiger counter");
                }
                Err(err @ DeviceError::TransportFault(_)) => {
                    stats.transport_faults += 1;
                    consecutive_faults += 1;
                    error!(
                        %err,
                        consecutive = consecutive_faults,
                        "Error getting CPM from the Geiger counter"
                    );

                    if consecutive_faults >= self.config.reconnect_after() {
                        warn!(
                            device = self.connector.describe(),
                            faults = consecutive_faults,
                            "Too many consecutive transport faults, reconnecting"
                        );
                        drop(conn);
                        conn = match self.establish(shutdown.as_mut()).await? {
                            Some(conn) => conn,
                            None => break,
                        };
                        consecutive_faults = 0;
                        stats.reconnects += 1;
                        info!(
                            device = self.connector.describe(),
                            "Reconnected to Geiger counter"
                        );
                    }
                }
            }
        }

        debug!(?stats, "Poll loop finished");
        info!("Exiting gracefully");
        Ok(stats)
    }

    /// Open a connection according to the reconnect policy.
    ///
    /// Returns `Ok(None)` if shutdown was requested while connecting or
    /// waiting to retry.
    async fn establish<S>(
        &self,
        mut shutdown: Pin<&mut S>,
    ) -> Result<Option<Connection>, ConnectError>
    where
        S: Future<Output = ()>,
    {
        let mut backoff = match self.config.reconnect_policy() {
            ReconnectPolicy::FailFast => None,
            ReconnectPolicy::Retry { initial, max } => Some(Backoff::new(initial, max)),
        };

        loop {
            let attempt = tokio::select! {
                biased;
                () = shutdown.as_mut() => return Ok(None),
                attempt = self.connector.connect() => attempt,
            };

            let err = match attempt {
                Ok(conn) => return Ok(Some(conn)),
                Err(err) => err,
            };
            let Some(backoff) = backoff.as_mut() else {
                return Err(err);
            };

            let delay = backoff.next_delay();
            error!(
                %err,
                retry_in = ?delay,
                "Unable to establish connection to the Geiger counter"
            );
            tokio::select! {
                biased;
                () = shutdown.as_mut() => return Ok(None),
                () = time::sleep(delay) => {}
            }
        }
    }
}
