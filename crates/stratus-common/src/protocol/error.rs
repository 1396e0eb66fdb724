//! Transport-layer errors.
//!
//! Everything the network can do wrong is folded into [`TransportError`]
//! with a closed [`TransportErrorKind`]. Callers never see raw
//! `std::io::Error`s from the channel.

use std::fmt;
use std::io;

use thiserror::Error;

/// Closed set of transport failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Canceled,
    Unknown,
    DeadlineExceeded,
    NotFound,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Internal,
    Unavailable,
    Unauthenticated,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Canceled => "canceled",
            TransportErrorKind::Unknown => "unknown",
            TransportErrorKind::DeadlineExceeded => "deadline exceeded",
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::ResourceExhausted => "resource exhausted",
            TransportErrorKind::FailedPrecondition => "failed precondition",
            TransportErrorKind::Aborted => "aborted",
            TransportErrorKind::Internal => "internal",
            TransportErrorKind::Unavailable => "unavailable",
            TransportErrorKind::Unauthenticated => "unauthenticated",
        };
        f.write_str(s)
    }
}

/// A transport-layer failure: reason plus human-readable context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Maps an IO error to the transport taxonomy.
    ///
    /// Timeouts become `DeadlineExceeded`; connection-level failures become
    /// `Unavailable`; anything else is `Unknown`.
    pub fn from_io(err: io::Error, context: &str) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                TransportErrorKind::DeadlineExceeded
            }
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportErrorKind::Unavailable,
            _ => TransportErrorKind::Unknown,
        };
        Self::new(kind, format!("{context}: {err}"))
    }

    /// The error every pending call observes when its channel closes.
    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Unavailable, "channel closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_maps_to_deadline() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let mapped = TransportError::from_io(err, "reading frame");
        assert_eq!(mapped.kind, TransportErrorKind::DeadlineExceeded);
        assert!(mapped.message.contains("reading frame"));
    }

    #[test]
    fn io_connection_errors_map_to_unavailable() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let mapped = TransportError::from_io(io::Error::new(kind, "boom"), "op");
            assert_eq!(mapped.kind, TransportErrorKind::Unavailable);
        }
    }

    #[test]
    fn other_io_errors_map_to_unknown() {
        let mapped =
            TransportError::from_io(io::Error::new(io::ErrorKind::InvalidData, "bad"), "op");
        assert_eq!(mapped.kind, TransportErrorKind::Unknown);
    }
}
