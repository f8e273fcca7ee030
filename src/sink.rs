//! The response sink boundary: where status, headers, and body bytes leave
//! the framework.
//!
//! [`ResponseSink`] splits the surface in two. `write_head` and `write_body`
//! are required of every sink. Flush, hijack, and close-notify are optional
//! capabilities with default implementations that return
//! [`Error::Unsupported`] naming the missing [`Capability`] — a sink declares
//! what it can do by overriding, and a caller invoking anything else gets a
//! typed failure at the call site instead of a silent no-op or a downcast
//! gamble.
//!
//! [`HttpSink`] is the production implementation: raw HTTP/1.1 over a
//! connection, buffering one response and shipping it on `flush`.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

// ── Capabilities ──────────────────────────────────────────────────────────────

/// An optional sink capability, named in [`Error::Unsupported`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
    Flush,
    Hijack,
    CloseNotify,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flush => "flush",
            Self::Hijack => "hijack",
            Self::CloseNotify => "close-notify",
        })
    }
}

/// A bidirectional byte stream a sink can be built over or hijacked into.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Conn for T {}

/// The raw connection yielded by [`ResponseSink::hijack`].
pub type BoxedConn = Box<dyn Conn>;

/// Resolves when the peer closes the connection. Yielded by
/// [`ResponseSink::close_notify`] on sinks that support it.
pub type CloseSignal = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

// ── ResponseSink ──────────────────────────────────────────────────────────────

/// The boundary object through which a response reaches the client.
///
/// Implementations must provide the two write operations. The optional
/// capabilities default to [`Error::Unsupported`]; override exactly the ones
/// the transport genuinely carries.
pub trait ResponseSink: Send {
    /// Writes the status line and headers.
    ///
    /// Repeated calls are taken at face value and forwarded; this layer does
    /// not police protocol state.
    fn write_head(
        &mut self,
        status: u16,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Writes body bytes.
    fn write_body(&mut self, chunk: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Pushes everything buffered so far toward the client.
    fn flush(&mut self) -> impl Future<Output = Result<(), Error>> + Send {
        async { Err(Error::Unsupported(Capability::Flush)) }
    }

    /// Detaches and returns the underlying connection, leaving the sink
    /// unable to write. For protocol upgrades and other escape hatches.
    fn hijack(&mut self) -> Result<BoxedConn, Error> {
        Err(Error::Unsupported(Capability::Hijack))
    }

    /// Returns a future that resolves when the client goes away.
    fn close_notify(&mut self) -> Result<CloseSignal, Error> {
        Err(Error::Unsupported(Capability::CloseNotify))
    }
}

// ── HttpSink ──────────────────────────────────────────────────────────────────

/// Raw HTTP/1.1 response writer over a connection.
///
/// Head and body bytes accumulate in an internal buffer; `flush` writes the
/// buffer to the connection in one burst. A body write with no preceding
/// head applies the transport's implicit `200 OK` (with no headers, so
/// callers framing their own responses must supply `content-length`
/// themselves). Supports `flush` and `hijack`; close-notify is not carried.
pub struct HttpSink<T> {
    stream: Option<T>,
    buf: Vec<u8>,
    head_written: bool,
}

impl<T: Conn> HttpSink<T> {
    pub fn new(stream: T) -> Self {
        Self { stream: Some(stream), buf: Vec::with_capacity(256), head_written: false }
    }

    /// Returns the connection for reuse, or `None` if it was hijacked.
    pub fn into_stream(self) -> Option<T> {
        self.stream
    }
}

impl<T: Conn> ResponseSink for HttpSink<T> {
    async fn write_head(&mut self, status: u16, headers: &[(String, String)]) -> Result<(), Error> {
        self.buf.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", status, status_reason(status)).as_bytes(),
        );
        for (name, value) in headers {
            self.buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        self.buf.extend_from_slice(b"\r\n");
        self.head_written = true;
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if !self.head_written {
            self.write_head(200, &[]).await?;
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Io(detached()));
        };
        stream.write_all(&self.buf).await?;
        stream.flush().await?;
        self.buf.clear();
        Ok(())
    }

    fn hijack(&mut self) -> Result<BoxedConn, Error> {
        match self.stream.take() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(Error::Io(detached())),
        }
    }
}

fn detached() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "connection detached by hijack")
}

// ── Status reason phrases ─────────────────────────────────────────────────────

pub(crate) fn status_reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Content Too Large",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

// ── Test support ──────────────────────────────────────────────────────────────
