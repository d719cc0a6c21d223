//! Per-session request/response scratch state.

use afd_auth::{DigestState, WwwAuthenticate};
use chrono::{DateTime, Utc};

use crate::header::Methods;

/// State carried between requests of one HTTP session.
///
/// Response fields are cleared by [`HttpMessageState::begin_response`]
/// before each status line is read. Authentication fields survive until a
/// new challenge replaces them.
#[derive(Debug, Clone, Default)]
pub struct HttpMessageState {
    /// Scheme the server last challenged with.
    pub www_authenticate: WwwAuthenticate,
    /// Digest session, present after the first digest challenge.
    pub digest: Option<DigestState>,
    /// Last authorization header value built.
    pub authorization: Option<String>,
    /// Cached Basic header value.
    pub basic: Option<String>,
    /// S3 LIST paging cursor for the next page.
    pub marker: Option<String>,

    /// `Content-Length` of the last response.
    pub content_length: Option<u64>,
    /// `Date` of the last response.
    pub date: Option<DateTime<Utc>>,
    /// `Last-Modified` of the last response.
    pub last_modified: Option<DateTime<Utc>>,
    /// Last response used chunked transfer encoding.
    pub chunked: bool,
    /// Entity tag without quotes.
    pub etag: Option<String>,
    /// The entity tag carried `W/`.
    pub weak_etag: bool,
    /// Last response announced `Connection: close`.
    pub close: bool,
    /// Methods from the last `Allow` header.
    pub allow: Methods,
    /// Safe filename from `Content-Disposition`; kept until replaced.
    pub filename: Option<String>,

    /// Body bytes of the current response not yet handed to the caller;
    /// `None` when chunked or delimited by connection close.
    pub body_remaining: Option<u64>,
    /// A response body is still on the wire.
    pub body_pending: bool,
    /// Retries spent in this session.
    pub retries: u32,
    /// Methods found unsupported; calls to them succeed without I/O.
    pub not_working: Methods,
}

impl HttpMessageState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the response fields before a new status line.
    pub fn begin_response(&mut self) {
        self.content_length = None;
        self.date = None;
        self.last_modified = None;
        self.chunked = false;
        self.etag = None;
        self.weak_etag = false;
        self.close = false;
        self.allow = Methods::NONE;
        self.body_remaining = None;
        self.body_pending = false;
    }

    /// Returns the digest realm.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.digest.as_ref().map(|d| d.challenge().realm.as_str())
    }

    /// Returns the digest nonce.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.digest.as_ref().map(|d| d.challenge().nonce.as_str())
    }

    /// Returns the digest opaque value.
    #[must_use]
    pub fn opaque(&self) -> Option<&str> {
        self.digest
            .as_ref()
            .and_then(|d| d.challenge().opaque.as_deref())
    }

    /// Returns the digest nonce count of the last request.
    #[must_use]
    pub fn nc(&self) -> u32 {
        self.digest.as_ref().map_or(0, DigestState::nc)
    }

    /// Returns the body length that applies to the last response: none when
    /// chunked.
    #[must_use]
    pub const fn body_length(&self) -> Option<u64> {
        if self.chunked {
            None
        } else {
            self.content_length
        }
    }

    /// Restarts the digest nonce count after a reconnect.
    pub fn connection_reopened(&mut self) {
        if let Some(digest) = self.digest.as_mut() {
            digest.reset_count();
        }
        self.close = false;
        self.body_remaining = None;
        self.body_pending = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_overrides_content_length() {
        let mut st = HttpMessageState::new();
        st.content_length = Some(10);
        assert_eq!(st.body_length(), Some(10));
        st.chunked = true;
        assert_eq!(st.body_length(), None);
    }

    #[test]
    fn test_begin_response_keeps_auth_and_filename() {
        let mut st = HttpMessageState::new();
        st.www_authenticate = WwwAuthenticate::Basic;
        st.filename = Some("a.txt".to_string());
        st.content_length = Some(1);
        st.close = true;
        st.not_working = Methods::OPTIONS;
        st.begin_response();
        assert_eq!(st.www_authenticate, WwwAuthenticate::Basic);
        assert_eq!(st.filename.as_deref(), Some("a.txt"));
        assert_eq!(st.content_length, None);
        assert!(!st.close);
        assert_eq!(st.not_working, Methods::OPTIONS);
    }
}
