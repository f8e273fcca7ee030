//! Unified error type.

use std::fmt;

use crate::sink::Capability;

/// The error type returned by lintel's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding to a port, socket I/O on the response
/// path, or asking a response sink for a capability it does not carry.
#[derive(Debug)]
pub enum Error {
    /// Socket or transport failure.
    Io(std::io::Error),
    /// The underlying response sink does not support an optional capability
    /// (flush, hijack, close-notify). Surfaced at the call site rather than
    /// swallowed, mirroring the transport's own capability contract.
    Unsupported(Capability),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Unsupported(cap) => write!(f, "response sink does not support {cap}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Unsupported(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
