//! Error types for SMTP operations.

use afd_net::{ErrorKind, ExitCode};

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport, TLS or framing error.
    #[error(transparent)]
    Net(#[from] afd_net::Error),

    /// Server returned an error reply.
    #[error("SMTP error {code}: {message}")]
    Reply {
        /// Reply code (e.g., 550).
        code: u16,
        /// Last reply text from the server.
        message: String,
    },

    /// Protocol error (unparseable reply).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid envelope address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Operation not valid in the current state or configuration.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a reply error from a code and message.
    #[must_use]
    pub fn reply(code: u16, message: impl Into<String>) -> Self {
        Self::Reply {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Reply { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Reply { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Net(e) => e.kind(),
            Self::Reply { .. } => ErrorKind::Application,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::InvalidAddress(_) | Self::NotSupported(_) | Self::InvalidState(_) => {
                ErrorKind::Permanent
            }
        }
    }

    /// Returns true if retrying on a new connection may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || self.kind().is_retryable()
    }

    /// Maps the error onto the caller-visible exit code.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Net(e) => e.exit_code(),
            Self::Reply { code, .. } => ExitCode::Reply(*code),
            Self::Protocol(_) => ExitCode::Incorrect,
            Self::InvalidAddress(_) | Self::NotSupported(_) | Self::InvalidState(_) => {
                ExitCode::PermanentIncorrect
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_classification() {
        let err = Error::reply(550, "no such user");
        assert!(err.is_permanent());
        assert!(!err.is_transient());
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), ExitCode::Reply(550));
        assert_eq!(err.to_string(), "SMTP error 550: no such user");

        let err = Error::reply(451, "try later");
        assert!(err.is_transient());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_net_error_passes_through() {
        let err = Error::from(afd_net::Error::RemoteHangup);
        assert_eq!(err.kind(), ErrorKind::RemoteHangup);
        assert_eq!(err.exit_code(), ExitCode::Incorrect);
    }

    #[test]
    fn test_configuration_errors_are_permanent() {
        let err = Error::NotSupported("STARTTLS".into());
        assert_eq!(err.exit_code(), ExitCode::PermanentIncorrect);
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
