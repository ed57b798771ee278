//! Request/response access to a GQ GMC style Geiger counter.
//!
//! The counter speaks a strictly synchronous protocol: the host writes a fixed
//! ASCII command and the device answers with a fixed-size binary payload. Only
//! `<GETCPM>>` is used here, which returns the current counts-per-minute as a
//! big-endian `u16`.

use std::fmt;
use std::future::{Future, poll_fn};
use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;

/// The literal request frame asking for the current counts-per-minute.
pub const GETCPM_REQUEST: &[u8; 9] = b"<GETCPM>>";

/// Size of the `GETCPM` response payload.
pub const CPM_RESPONSE_LEN: usize = 2;

/// Counts per minute reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cpm(pub u16);

impl Cpm {
    /// Decode the two-byte big-endian response payload.
    pub fn from_be_bytes(bytes: [u8; CPM_RESPONSE_LEN]) -> Self {
        Cpm(u16::from_be_bytes(bytes))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Cpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure of a single request/response exchange.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device answered with fewer bytes than expected before the timeout.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    /// The transport failed while writing the request or reading the response.
    #[error("transport fault: {0}")]
    TransportFault(#[from] io::Error),
}

impl DeviceError {
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, DeviceError::TransportFault(_))
    }
}

/// Error returned when the device connection cannot be opened.
#[derive(Error, Debug)]
#[error("unable to open {path}: {source}")]
pub struct ConnectError {
    path: String,
    #[source]
    source: io::Error,
}

impl ConnectError {
    pub fn new(path: impl Into<String>, source: io::Error) -> Self {
        ConnectError {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A byte stream the counter can be queried over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// An exclusively owned, open device connection.
pub type Connection = Box<dyn Transport>;

/// Opens device connections.
///
/// The poll loop holds one of these so it can re-open the device after
/// repeated transport faults; tests substitute a scripted implementation.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Connection, ConnectError>> + Send + '_>>;

    /// Human readable name of the device, used in log events.
    fn describe(&self) -> &str;
}

/// Connector for a real serial port (8N1, no flow control).
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialConnector {
            path: path.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Connection, ConnectError>> + Send + '_>> {
        Box::pin(async move {
            let port = tokio_serial::new(&self.path, self.baud_rate)
                .open_native_async()
                .map_err(|e| ConnectError::new(&self.path, e.into()))?;
            Ok(Box::new(port) as Connection)
        })
    }

    fn describe(&self) -> &str {
        &self.path
    }
}

/// Perform one `GETCPM` exchange over `conn`.
///
/// Input already waiting on the connection (such as the tail of a reply
/// that arrived after an earlier timeout) is discarded first so it cannot
/// be mistaken for the start of this reply. Then the request frame is
/// written and the two response bytes are read, waiting at most `timeout`
/// for each phase. There are no retries.
///
/// # Arguments
/// * `conn` - An open device connection; only one exchange may be in flight
/// * `timeout` - Upper bound for writing the request and for receiving the reply
///
/// # Errors
/// * [`DeviceError::ShortRead`] if fewer than two bytes arrive before the
///   deadline or the stream ends
/// * [`DeviceError::TransportFault`] for any other I/O failure
pub async fn query<T>(conn: &mut T, timeout: Duration) -> Result<Cpm, DeviceError>
where
    T: Transport + ?Sized,
{
    let stale = discard_pending_input(conn).await?;
    if stale > 0 {
        tracing::debug!(bytes = stale, "Discarded stale input before request");
    }

    write_request(conn, timeout).await?;

    let mut response = [0u8; CPM_RESPONSE_LEN];
    let received = read_until_deadline(conn, &mut response, Instant::now() + timeout).await?;
    if received < CPM_RESPONSE_LEN {
        return Err(DeviceError::ShortRead {
            expected: CPM_RESPONSE_LEN,
            received,
        });
    }

    Ok(Cpm::from_be_bytes(response))
}

/// Read and drop whatever can be read without waiting. Returns the number
/// of bytes dropped.
async fn discard_pending_input<T>(conn: &mut T) -> io::Result<usize>
where
    T: Transport + ?Sized,
{
    let mut scratch = [0u8; 64];
    let mut discarded = 0;
    loop {
        let mut buf = ReadBuf::new(&mut scratch);
        let ready = poll_fn(|cx| match Pin::new(&mut *conn).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Ready(None),
            Poll::Ready(result) => Poll::Ready(Some(result)),
        })
        .await;

        match ready {
            None => return Ok(discarded),
            Some(Ok(())) if buf.filled().is_empty() => return Ok(discarded),
            Some(Ok(())) => discarded += buf.filled().len(),
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn write_request<T>(conn: &mut T, timeout: Duration) -> io::Result<()>
where
    T: Transport + ?Sized,
{
    let write = async {
        conn.write_all(GETCPM_REQUEST).await?;
        conn.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out writing request")),
    }
}

/// Fill `buf` until it is full, the stream ends or `deadline` passes.
/// Returns the number of bytes received.
async fn read_until_deadline<T>(
    conn: &mut T,
    buf: &mut [u8],
    deadline: Instant,
) -> io::Result<usize>
where
    T: Transport + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match tokio::time::timeout_at(deadline, conn.read(&mut buf[filled..])).await {
            Err(_elapsed) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Some serial drivers report an expired read timeout as an error
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => break,
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(filled)
}
