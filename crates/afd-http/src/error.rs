//! Error types for the HTTP client.

use afd_net::{ErrorKind, ExitCode};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport, TLS or framing failure.
    #[error(transparent)]
    Net(#[from] afd_net::Error),

    /// Credentials or challenge could not be turned into a header.
    #[error("Authentication error: {0}")]
    Auth(#[from] afd_auth::Error),

    /// The server answered with a status the operation does not accept.
    #[error("{method} failed with status {code}: {message}")]
    Status {
        /// Request method.
        method: &'static str,
        /// HTTP status code.
        code: u16,
        /// Status line reason plus any S3 error code found in the body.
        message: String,
    },

    /// 401 without a usable scheme, or a second 401 after retrying.
    #[error("Authentication failed: {0}")]
    AuthExhausted(String),

    /// The response could not be parsed.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Net(e) => e.kind(),
            Self::Status { .. } => ErrorKind::Application,
            Self::AuthExhausted(_) => ErrorKind::AuthExhausted,
            Self::Auth(_) | Self::Malformed(_) | Self::InvalidState(_) => ErrorKind::Protocol,
        }
    }

    /// Returns true if retrying on a new connection may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Maps the error onto the caller-visible exit code.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Net(e) => e.exit_code(),
            Self::Status { code, .. } => ExitCode::Reply(*code),
            _ => ExitCode::Incorrect,
        }
    }

    /// Returns the HTTP status if the server rejected the request.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_reply_code() {
        let err = Error::Status {
            method: "GET",
            code: 404,
            message: "Not Found (NoSuchKey)".to_string(),
        };
        assert_eq!(err.exit_code(), ExitCode::Reply(404));
        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "GET failed with status 404: Not Found (NoSuchKey)"
        );
    }

    #[test]
    fn test_net_errors_keep_their_classification() {
        let err = Error::from(afd_net::Error::RemoteHangup);
        assert_eq!(err.kind(), ErrorKind::RemoteHangup);
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), ExitCode::Incorrect);
    }
}
