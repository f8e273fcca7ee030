//! Status-recording response decorator.
//!
//! [`StatusRecorder`] wraps a [`ResponseSink`] and is itself a
//! [`ResponseSink`]: every operation is forwarded to the wrapped sink
//! unchanged, and the status code that actually reached the sink is kept for
//! the request's log line. No body bytes are buffered and no output is
//! altered — the decorator observes, it does not participate.

use crate::error::Error;
use crate::sink::{BoxedConn, CloseSignal, ResponseSink};

/// Records the HTTP status ultimately written through it.
///
/// One recorder serves one request at a time. Instances cycle through
/// [`RecorderPool`](crate::pool::RecorderPool): released with their state
/// left stale, re-armed by [`reset`](StatusRecorder::reset) on the next
/// acquisition.
pub struct StatusRecorder<S> {
    sink: Option<S>,
    status: u16,
    started: bool,
}

impl<S: ResponseSink> StatusRecorder<S> {
    pub fn new(sink: S) -> Self {
        Self { sink: Some(sink), status: 200, started: false }
    }

    /// A recorder with no sink attached, as fabricated by the pool.
    pub(crate) fn vacant() -> Self {
        Self { sink: None, status: 200, started: false }
    }

    /// Re-arms a pooled instance: status back to the 200 default, `started`
    /// cleared, `sink` attached. Must run before a reused recorder sees its
    /// first write, since release leaves the previous request's state behind.
    pub fn reset(&mut self, sink: S) {
        self.sink = Some(sink);
        self.status = 200;
        self.started = false;
    }

    /// Detaches the sink, e.g. to reuse its connection. Subsequent writes
    /// fail until [`reset`](StatusRecorder::reset).
    pub fn take_sink(&mut self) -> Option<S> {
        self.sink.take()
    }

    /// The recorded status: the last head the sink accepted, or 200 if none.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether any head or body write has gone through.
    pub fn started(&self) -> bool {
        self.started
    }

    fn sink_mut(&mut self) -> Result<&mut S, Error> {
        self.sink.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "recorder has no sink attached",
            ))
        })
    }
}

impl<S: ResponseSink> ResponseSink for StatusRecorder<S> {
    /// Forwards the head and records its status.
    ///
    /// Repeated calls are forwarded verbatim — the recorder does not enforce
    /// write-once semantics, and the recorded status tracks the last head
    /// the sink accepted. A head the sink rejects is not recorded.
    async fn write_head(&mut self, status: u16, headers: &[(String, String)]) -> Result<(), Error> {
        self.sink_mut()?.write_head(status, headers).await?;
        self.status = status;
        self.started = true;
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.sink_mut()?.write_body(chunk).await?;
        self.started = true;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.sink_mut()?.flush().await
    }

    fn hijack(&mut self) -> Result<BoxedConn, Error> {
        self.sink_mut()?.hijack()
    }

    fn close_notify(&mut self) -> Result<CloseSignal, Error> {
        self.sink_mut()?.close_notify()
    }
}
