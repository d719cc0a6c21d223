//! Error types for authentication.

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Authentication error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The challenge header could not be parsed.
    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    /// A required challenge parameter is missing.
    #[error("Challenge lacks required parameter `{0}`")]
    MissingParameter(&'static str),

    /// The server asked for a digest algorithm we do not implement.
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The server only offers a quality of protection we cannot provide.
    #[error("Unsupported quality of protection: {0}")]
    UnsupportedQop(String),

    /// Credentials are unusable for this scheme.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The signing key could not be created.
    #[error("Signing failed: {0}")]
    Signing(String),
}
