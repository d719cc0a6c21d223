//! # afd-auth
//!
//! Credential handling for the AFD HTTP client.
//!
//! ## Features
//!
//! - **Basic**: `Authorization: Basic <b64>` (RFC 7617)
//! - **Digest**: MD5, SHA-256 and SHA-512-256 with their `-sess` variants,
//!   `qop=auth`/`auth-int`, `userhash`, `opaque` and `nextnonce`
//!   (RFC 7616)
//! - **AWS4-HMAC-SHA256**: canonical request, signing key chain and the S3
//!   LIST query builder
//!
//! Everything here is pure computation; nothing touches the network.
//!
//! ## Quick Start
//!
//! ```ignore
//! use afd_auth::aws4::{AwsCredentials, AwsRequest};
//!
//! let creds = AwsCredentials::new("AKIAEXAMPLE", "SECRET");
//! let signed = AwsRequest::new("GET", "s3.example", "/bucket/key", "us-east-1")
//!     .sign(Some(&creds), chrono::Utc::now())?;
//! print!("{}", signed.header_lines());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod aws4;
pub mod basic;
pub mod digest;
mod error;

pub use aws4::{AwsCredentials, AwsRequest, AwsSignedHeaders, ListQuery, ListVersion};
pub use digest::{Algorithm, Challenge, DigestOptions, DigestState, Qop};
pub use error::{Error, Result};

/// Authentication scheme configured for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthType {
    /// No credentials are sent unless the server challenges.
    #[default]
    None,
    /// HTTP Basic.
    Basic,
    /// HTTP Digest.
    Digest,
    /// S3 with AWS Signature V4.
    Aws4HmacSha256,
    /// S3 with anonymous, unsigned requests.
    AwsNoSignRequest,
    /// SMTP `AUTH LOGIN`.
    SmtpAuthLogin,
    /// SMTP `AUTH PLAIN`.
    SmtpAuthPlain,
}

impl AuthType {
    /// Returns true for the two S3 modes.
    #[must_use]
    pub const fn is_aws(self) -> bool {
        matches!(self, Self::Aws4HmacSha256 | Self::AwsNoSignRequest)
    }

    /// Returns true for the SMTP mechanisms.
    #[must_use]
    pub const fn is_smtp(self) -> bool {
        matches!(self, Self::SmtpAuthLogin | Self::SmtpAuthPlain)
    }
}

/// Scheme the server announced in its last `WWW-Authenticate` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WwwAuthenticate {
    /// Nothing usable seen yet.
    #[default]
    Unknown,
    /// `Basic`.
    Basic,
    /// `Digest` with MD5.
    DigestMd5,
    /// `Digest` with MD5-sess.
    DigestMd5Sess,
    /// `Digest` with SHA-256.
    DigestSha256,
    /// `Digest` with SHA-256-sess.
    DigestSha256Sess,
    /// `Digest` with SHA-512-256.
    DigestSha512_256,
    /// `Digest` with SHA-512-256-sess.
    DigestSha512_256Sess,
}

impl WwwAuthenticate {
    /// Returns true for any digest variant.
    #[must_use]
    pub const fn is_digest(self) -> bool {
        !matches!(self, Self::Unknown | Self::Basic)
    }
}

impl From<Algorithm> for WwwAuthenticate {
    fn from(alg: Algorithm) -> Self {
        match alg {
            Algorithm::Md5 => Self::DigestMd5,
            Algorithm::Md5Sess => Self::DigestMd5Sess,
            Algorithm::Sha256 => Self::DigestSha256,
            Algorithm::Sha256Sess => Self::DigestSha256Sess,
            Algorithm::Sha512_256 => Self::DigestSha512_256,
            Algorithm::Sha512_256Sess => Self::DigestSha512_256Sess,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_www_authenticate_from_algorithm() {
        assert_eq!(
            WwwAuthenticate::from(Algorithm::Sha512_256Sess),
            WwwAuthenticate::DigestSha512_256Sess
        );
        assert!(WwwAuthenticate::from(Algorithm::Md5).is_digest());
        assert!(!WwwAuthenticate::Basic.is_digest());
    }

    #[test]
    fn test_auth_type_groups() {
        assert!(AuthType::AwsNoSignRequest.is_aws());
        assert!(AuthType::SmtpAuthPlain.is_smtp());
        assert!(!AuthType::Digest.is_aws());
        assert_eq!(AuthType::default(), AuthType::None);
    }
}
