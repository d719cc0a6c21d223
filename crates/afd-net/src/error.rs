//! Error types and outcome classification shared by the protocol clients.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::tls::TlsFailure;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transport, TLS and framing layers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error that does not fall into a more specific category.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A connect, read or write did not complete within the transfer timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The peer reset the connection (or the pipe broke) during I/O.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The remote host actively refused the connection.
    #[error("Connection refused by {host}:{port}")]
    Refused {
        /// Host that refused.
        host: String,
        /// Port that refused.
        port: u16,
    },

    /// Name resolution failed and no cached address could be used.
    #[error("Failed to resolve {host}: {message}")]
    Resolve {
        /// Hostname that failed to resolve.
        host: String,
        /// Resolver diagnostic.
        message: String,
    },

    /// TLS handshake or session failure.
    #[error("TLS error ({kind}): {message}")]
    Tls {
        /// Classified failure.
        kind: TlsFailure,
        /// Diagnostic from the TLS library.
        message: String,
    },

    /// Hostname not usable as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The peer closed the connection (zero-byte read).
    #[error("Remote hangup")]
    RemoteHangup,

    /// A received line did not fit into the line buffer.
    #[error("Line exceeds buffer capacity of {0} bytes")]
    LineTooLong(usize),

    /// A command to be sent exceeds the maximum line length.
    #[error("Command of {0} bytes exceeds maximum line length")]
    CommandTooLong(usize),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration failure that will not go away by retrying.
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl Error {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConnectionReset(_) => ErrorKind::ConnectionReset,
            Self::Io(e) => match e.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionReset,
                io::ErrorKind::ConnectionRefused => ErrorKind::Refused,
                io::ErrorKind::TimedOut => ErrorKind::Timeout,
                io::ErrorKind::PermissionDenied => ErrorKind::Permanent,
                _ => ErrorKind::Unknown,
            },
            Self::Refused { .. } => ErrorKind::Refused,
            Self::Resolve { .. } => ErrorKind::Resolve,
            Self::Tls { .. } | Self::InvalidDnsName(_) => ErrorKind::Tls,
            Self::RemoteHangup => ErrorKind::RemoteHangup,
            Self::LineTooLong(_)
            | Self::CommandTooLong(_)
            | Self::Protocol(_)
            | Self::InvalidState(_) => ErrorKind::Protocol,
            Self::Permanent(_) => ErrorKind::Permanent,
        }
    }

    /// Returns true if a fresh connection has a reasonable chance of succeeding.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Maps the error onto the caller-visible exit code.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Permanent(_) => ExitCode::PermanentIncorrect,
            Self::Tls { kind, .. } if kind.is_certificate_problem() => {
                ExitCode::PermanentDisconnect
            }
            _ => ExitCode::Incorrect,
        }
    }
}

/// Error classification used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// select/poll expired.
    Timeout,
    /// `ECONNRESET` / `EPIPE` / `EBADF` during I/O.
    ConnectionReset,
    /// `ECONNREFUSED` at connect.
    Refused,
    /// Resolver failure.
    Resolve,
    /// TLS handshake failure.
    Tls,
    /// Peer closed the connection.
    RemoteHangup,
    /// Framing error.
    Protocol,
    /// 4xx/5xx from the server.
    Application,
    /// 401 with no usable scheme, or a second 401.
    AuthExhausted,
    /// Configuration problem.
    Permanent,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Returns true if the condition may clear up on a new connection.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::RemoteHangup
        )
    }
}

/// Caller-visible outcome of a protocol operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    /// Operation completed.
    Success,
    /// Remote has nothing new for us (304, empty body with a filename).
    NothingToFetch,
    /// Response body uses chunked transfer encoding.
    Chunked,
    /// The terminating zero-size chunk was read.
    HttpLastChunk,
    /// The connection was torn down and reopened; retry once.
    ConnectionReopened,
    /// Operation failed; the caller decides whether to retry.
    Incorrect,
    /// Operation failed and retrying will not help.
    PermanentIncorrect,
    /// The connection must not be re-established.
    PermanentDisconnect,
    /// Raw HTTP status or SMTP reply code.
    Reply(u16),
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::NothingToFetch => f.write_str("NOTHING_TO_FETCH"),
            Self::Chunked => f.write_str("CHUNKED"),
            Self::HttpLastChunk => f.write_str("HTTP_LAST_CHUNK"),
            Self::ConnectionReopened => f.write_str("CONNECTION_REOPENED"),
            Self::Incorrect => f.write_str("INCORRECT"),
            Self::PermanentIncorrect => f.write_str("PERMANENT_INCORRECT"),
            Self::PermanentDisconnect => f.write_str("PERMANENT_DISCONNECT"),
            Self::Reply(code) => write!(f, "{code}"),
        }
    }
}

/// Converts a low-level write error into the taxonomy, logging it at the
/// level the condition deserves.
pub(crate) fn classify_write_error(err: io::Error, host: &str) -> Error {
    match err.kind() {
        io::ErrorKind::BrokenPipe => {
            tracing::info!(host, "write failed: broken pipe");
            Error::ConnectionReset(err.to_string())
        }
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            tracing::error!(host, error = %err, "write failed: connection reset");
            Error::ConnectionReset(err.to_string())
        }
        _ if err.raw_os_error() == Some(EBADF) => {
            tracing::error!(host, error = %err, "write failed: bad file descriptor");
            Error::ConnectionReset(err.to_string())
        }
        _ => {
            tracing::error!(host, error = %err, "write failed");
            Error::Io(err)
        }
    }
}

/// Converts a low-level read error into the taxonomy.
pub(crate) fn classify_read_error(err: io::Error, host: &str) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            tracing::error!(host, error = %err, "read failed: connection reset");
            Error::ConnectionReset(err.to_string())
        }
        io::ErrorKind::UnexpectedEof => Error::RemoteHangup,
        _ => {
            tracing::error!(host, error = %err, "read failed");
            Error::Io(err)
        }
    }
}

const EBADF: i32 = 9;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = Error::Timeout(Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), ExitCode::Incorrect);
    }

    #[test]
    fn test_refused_is_not_retryable() {
        let err = Error::Refused {
            host: "localhost".into(),
            port: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Refused);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_permanent_exit_code() {
        let err = Error::Permanent("no CA store".into());
        assert_eq!(err.exit_code(), ExitCode::PermanentIncorrect);
    }

    #[test]
    fn test_certificate_failure_disconnects() {
        let err = Error::Tls {
            kind: TlsFailure::Expired,
            message: "certificate has expired".into(),
        };
        assert_eq!(err.exit_code(), ExitCode::PermanentDisconnect);
    }

    #[test]
    fn test_broken_pipe_classified_as_reset() {
        let err = classify_write_error(io::Error::from(io::ErrorKind::BrokenPipe), "h");
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_io_kinds() {
        let err = Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.kind(), ErrorKind::Refused);
        let err = Error::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_exit_code_display() {
        assert_eq!(ExitCode::HttpLastChunk.to_string(), "HTTP_LAST_CHUNK");
        assert_eq!(ExitCode::Reply(404).to_string(), "404");
    }
}
