//! Scripted device, connector and sink shared by the unit tests.

use crate::device::{ConnectError, Connection, Connector, Cpm};
use crate::metrics::CpmSink;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub const TEST_DEVICE: &str = "/dev/test-cpm";

/// How the scripted device answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with these bytes.
    Bytes(Vec<u8>),
    /// Answer with these bytes, then go silent.
    Partial(Vec<u8>),
    /// Fail the response read.
    ReadFault(io::ErrorKind),
    /// Fail the request write.
    WriteFault(io::ErrorKind),
}

impl Reply {
    pub fn cpm(value: u16) -> Self {
        Reply::Bytes(value.to_be_bytes().to_vec())
    }
}

/// An in-memory counter that answers each request from a script.
///
/// Once the script runs out every request is accepted and never answered.
#[derive(Debug)]
pub struct ScriptedDevice {
    script: VecDeque<Reply>,
    pending: VecDeque<u8>,
    read_fault: Option<io::ErrorKind>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedDevice {
    pub fn new(script: Vec<Reply>) -> Self {
        ScriptedDevice {
            script: script.into(),
            pending: VecDeque::new(),
            read_fault: None,
            writes: Arc::default(),
        }
    }

    /// Handle to every request written so far, usable after the device has
    /// been handed to the poll loop.
    pub fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }
}

impl AsyncWrite for ScriptedDevice {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(Reply::WriteFault(kind)) = self.script.front() {
            let kind = *kind;
            self.script.pop_front();
            return Poll::Ready(Err(kind.into()));
        }

        self.writes.lock().unwrap().push(buf.to_vec());
        match self.script.pop_front() {
            Some(Reply::Bytes(bytes)) | Some(Reply::Partial(bytes)) => self.pending.extend(bytes),
            Some(Reply::ReadFault(kind)) => self.read_fault = Some(kind),
            Some(Reply::WriteFault(_)) => unreachable!("handled above"),
            None => {}
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for ScriptedDevice {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(kind) = self.read_fault.take() {
            return Poll::Ready(Err(kind.into()));
        }
        if self.pending.is_empty() {
            // silent device: only the caller's timeout ends this read
            return Poll::Pending;
        }
        while buf.remaining() > 0 {
            match self.pending.pop_front() {
                Some(byte) => buf.put_slice(&[byte]),
                None => break,
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Connector handing out scripted devices (or failures) in order.
#[derive(Debug, Default)]
pub struct FakeConnector {
    outcomes: Mutex<VecDeque<Result<ScriptedDevice, io::ErrorKind>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(outcomes: Vec<Result<ScriptedDevice, io::ErrorKind>>) -> Self {
        FakeConnector {
            outcomes: Mutex::new(outcomes.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Connection, ConnectError>> + Send + '_>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(io::ErrorKind::NotFound));
            match outcome {
                Ok(device) => Ok(Box::new(device) as Connection),
                Err(kind) => Err(ConnectError::new(TEST_DEVICE, kind.into())),
            }
        })
    }

    fn describe(&self) -> &str {
        TEST_DEVICE
    }
}

/// Sink remembering every published value.
#[derive(Debug, Default)]
pub struct RecordingSink {
    values: Mutex<Vec<Cpm>>,
}

impl RecordingSink {
    pub fn values(&self) -> Vec<Cpm> {
        self.values.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Cpm> {
        self.values.lock().unwrap().last().copied()
    }
}

impl CpmSink for RecordingSink {
    fn set(&self, cpm: Cpm) {
        self.values.lock().unwrap().push(cpm);
    }
}
