//! Response header parsing.
//!
//! Header names are matched case-insensitively against a dispatch table;
//! each handler stores its value in the [`HttpMessageState`]. Unknown
//! headers are ignored.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use afd_auth::digest::Challenge;
use afd_auth::{DigestState, WwwAuthenticate};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::state::HttpMessageState;
use crate::{Error, Result};

/// Longest filename accepted from `Content-Disposition`.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Set of HTTP methods, used for `Allow:` and the not-working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Methods(u8);

impl Methods {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// `HEAD`.
    pub const HEAD: Self = Self(1);
    /// `GET`.
    pub const GET: Self = Self(1 << 1);
    /// `PUT`.
    pub const PUT: Self = Self(1 << 2);
    /// `MOVE`.
    pub const MOVE: Self = Self(1 << 3);
    /// `POST`.
    pub const POST: Self = Self(1 << 4);
    /// `DELETE`.
    pub const DELETE: Self = Self(1 << 5);
    /// `OPTIONS`.
    pub const OPTIONS: Self = Self(1 << 6);

    const NAMES: [(&'static str, Self); 7] = [
        ("HEAD", Self::HEAD),
        ("GET", Self::GET),
        ("PUT", Self::PUT),
        ("MOVE", Self::MOVE),
        ("POST", Self::POST),
        ("DELETE", Self::DELETE),
        ("OPTIONS", Self::OPTIONS),
    ];

    /// Returns true if every method in `other` is in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Adds methods.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a comma-separated method list; unknown names are skipped.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let mut set = Self::NONE;
        for token in list.split(',').map(str::trim) {
            if let Some((_, m)) = Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(token))
            {
                set.insert(*m);
            }
        }
        set
    }
}

impl BitOr for Methods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Methods {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, m)| self.contains(*m))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join(", "))
    }
}

/// Parsed HTTP status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Minor version of `HTTP/1.x`.
    pub minor_version: u8,
    /// Status code.
    pub code: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
}

impl StatusLine {
    /// Parses `HTTP/1.x NNN reason`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for anything else.
    pub fn parse(line: &str) -> Result<Self> {
        let rest = line
            .strip_prefix("HTTP/1.")
            .ok_or_else(|| Error::malformed(format!("not a status line: {line}")))?;
        let mut chars = rest.chars();
        let minor_version = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| Error::malformed(format!("bad HTTP version: {line}")))?;
        let rest = chars.as_str();
        let rest = rest
            .strip_prefix(' ')
            .ok_or_else(|| Error::malformed(format!("not a status line: {line}")))?;
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 {
            return Err(Error::malformed(format!("bad status code: {line}")));
        }
        let code: u16 = code
            .parse()
            .map_err(|_| Error::malformed(format!("bad status code: {line}")))?;
        if !(100..=599).contains(&code) {
            return Err(Error::malformed(format!("status code out of range: {line}")));
        }
        Ok(Self {
            minor_version,
            code,
            reason: reason.trim().to_string(),
        })
    }

    /// Returns true for 1xx.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        self.code < 200
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

type Handler = fn(&mut HttpMessageState, &str);

const HANDLERS: &[(&str, Handler)] = &[
    ("Content-Length", content_length),
    ("Connection", connection),
    ("Transfer-Encoding", transfer_encoding),
    ("WWW-Authenticate", www_authenticate),
    ("Last-Modified", last_modified),
    ("ETag", etag),
    ("Allow", allow),
    ("Content-Disposition", content_disposition),
    ("Authentication-Info", authentication_info),
    ("Date", date),
];

/// Applies one header line to the state.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the line has no colon.
pub fn apply(state: &mut HttpMessageState, line: &str) -> Result<()> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::malformed(format!("header without colon: {line}")))?;
    let name = name.trim();
    let value = value.trim();
    if let Some((_, handler)) = HANDLERS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
    {
        handler(state, value);
    }
    Ok(())
}

fn content_length(state: &mut HttpMessageState, value: &str) {
    match value.parse::<u64>() {
        Ok(n) => state.content_length = Some(n),
        Err(_) => tracing::warn!(value, "ignoring invalid Content-Length"),
    }
}

fn connection(state: &mut HttpMessageState, value: &str) {
    if value
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
    {
        state.close = true;
    }
}

fn transfer_encoding(state: &mut HttpMessageState, value: &str) {
    if value
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
    {
        state.chunked = true;
    }
}

fn www_authenticate(state: &mut HttpMessageState, value: &str) {
    let (scheme, _) = value.split_once(' ').unwrap_or((value, ""));
    if scheme.eq_ignore_ascii_case("Basic") {
        // Digest is preferred over Basic whichever header comes first.
        if !state.www_authenticate.is_digest() {
            state.www_authenticate = WwwAuthenticate::Basic;
        }
    } else if scheme.eq_ignore_ascii_case("Digest") {
        match Challenge::parse(value) {
            Ok(challenge) => {
                state.www_authenticate = WwwAuthenticate::from(challenge.algorithm);
                tracing::debug!(
                    realm = %challenge.realm,
                    algorithm = challenge.algorithm.as_str(),
                    stale = challenge.stale,
                    "digest challenge"
                );
                match state.digest.as_mut() {
                    Some(digest) => digest.update(challenge),
                    None => state.digest = Some(DigestState::new(challenge)),
                }
            }
            Err(err) => tracing::warn!(error = %err, "ignoring unusable digest challenge"),
        }
    } else {
        tracing::debug!(scheme, "ignoring unsupported authentication scheme");
    }
    state.authorization = None;
}

fn last_modified(state: &mut HttpMessageState, value: &str) {
    match parse_http_date(value) {
        Some(time) => state.last_modified = Some(time),
        None => tracing::warn!(value, "ignoring unparsable Last-Modified"),
    }
}

fn date(state: &mut HttpMessageState, value: &str) {
    state.date = parse_http_date(value);
}

fn etag(state: &mut HttpMessageState, value: &str) {
    let (weak, tag) = match value.strip_prefix("W/") {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let tag = tag
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(tag);
    state.etag = Some(tag.to_string());
    state.weak_etag = weak;
}

fn allow(state: &mut HttpMessageState, value: &str) {
    state.allow = Methods::parse(value);
}

fn content_disposition(state: &mut HttpMessageState, value: &str) {
    match disposition_filename(value) {
        Some(name) => state.filename = Some(name),
        None => tracing::debug!(value, "no safe filename in Content-Disposition"),
    }
}

fn authentication_info(state: &mut HttpMessageState, value: &str) {
    if let Some(digest) = state.digest.as_mut() {
        if let Err(err) = digest.apply_authentication_info(value) {
            tracing::warn!(error = %err, "ignoring malformed Authentication-Info");
        }
    }
}

/// Extracts a safe filename from a `Content-Disposition` value.
///
/// Accepts `filename="name"` and `filename=name`. Names that start with
/// `.` or `/`, contain `/`, contain non-ASCII bytes or exceed
/// [`MAX_FILENAME_LENGTH`] are rejected.
#[must_use]
pub fn disposition_filename(value: &str) -> Option<String> {
    let pos = find_ignore_case(value, "filename=")?;
    let raw = &value[pos + "filename=".len()..];
    let name = if let Some(quoted) = raw.strip_prefix('"') {
        &quoted[..quoted.find('"')?]
    } else {
        raw.split(';').next().unwrap_or_default().trim()
    };
    is_safe_filename(name).then(|| name.to_string())
}

/// Applies the filename safety rules.
#[must_use]
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FILENAME_LENGTH
        && name.is_ascii()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.bytes().any(|b| b.is_ascii_control())
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Parses an HTTP date in IMF-fixdate, RFC 850 or asctime form.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

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
    use afd_auth::Algorithm;

    fn state() -> HttpMessageState {
        HttpMessageState::default()
    }

    #[test]
    fn test_status_line() {
        let status = StatusLine::parse("HTTP/1.1 206 Partial Content").unwrap();
        assert_eq!(status.code, 206);
        assert_eq!(status.reason, "Partial Content");
        assert_eq!(status.minor_version, 1);

        let bare = StatusLine::parse("HTTP/1.0 200").unwrap();
        assert_eq!(bare.code, 200);
        assert_eq!(bare.reason, "");

        assert!(StatusLine::parse("HTTP/2 200 OK").is_err());
        assert!(StatusLine::parse("HTTP/1.1 20 OK").is_err());
        assert!(StatusLine::parse("ICY 200 OK").is_err());
        assert!(StatusLine::parse("HTTP/1.1 999 Nope").is_err());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut st = state();
        apply(&mut st, "content-LENGTH: 11").unwrap();
        apply(&mut st, "CONNECTION: Close").unwrap();
        apply(&mut st, "transfer-encoding: chunked").unwrap();
        apply(&mut st, "X-Unknown: whatever").unwrap();
        assert_eq!(st.content_length, Some(11));
        assert!(st.close);
        assert!(st.chunked);
        assert!(apply(&mut st, "no colon here").is_err());
    }

    #[test]
    fn test_etag_weak_and_strong() {
        let mut st = state();
        apply(&mut st, "ETag: W/\"abc\"").unwrap();
        assert_eq!(st.etag.as_deref(), Some("abc"));
        assert!(st.weak_etag);
        apply(&mut st, "ETag: \"d41d8cd9\"").unwrap();
        assert_eq!(st.etag.as_deref(), Some("d41d8cd9"));
        assert!(!st.weak_etag);
    }

    #[test]
    fn test_allow_bitset() {
        let mut st = state();
        apply(&mut st, "Allow: GET, HEAD, OPTIONS, PROPFIND").unwrap();
        assert!(st.allow.contains(Methods::GET | Methods::HEAD | Methods::OPTIONS));
        assert!(!st.allow.contains(Methods::PUT));
        assert_eq!(st.allow.to_string(), "HEAD, GET, OPTIONS");
    }

    #[test]
    fn test_last_modified_formats() {
        let expected = 784_111_777;
        for value in [
            "Sun, 06 Nov 1994 08:49:37 GMT",
            "Sunday, 06-Nov-94 08:49:37 GMT",
            "Sun Nov  6 08:49:37 1994",
        ] {
            let mut st = state();
            apply(&mut st, &format!("Last-Modified: {value}")).unwrap();
            assert_eq!(st.last_modified.unwrap().timestamp(), expected, "{value}");
        }
    }

    #[test]
    fn test_content_disposition_filenames() {
        assert_eq!(
            disposition_filename("attachment; filename=\"report.csv\"").as_deref(),
            Some("report.csv")
        );
        assert_eq!(
            disposition_filename("attachment; FILENAME=data.bin; size=3").as_deref(),
            Some("data.bin")
        );
        assert_eq!(disposition_filename("attachment; filename=\".hidden\""), None);
        assert_eq!(disposition_filename("attachment; filename=\"/etc/passwd\""), None);
        assert_eq!(disposition_filename("attachment; filename=\"a/../b\""), None);
        assert_eq!(disposition_filename("attachment; filename=\"caf\u{e9}\""), None);
        let long = format!("attachment; filename=\"{}\"", "a".repeat(MAX_FILENAME_LENGTH + 1));
        assert_eq!(disposition_filename(&long), None);
        assert_eq!(disposition_filename("inline"), None);
    }

    #[test]
    fn test_digest_challenge_updates_state() {
        let mut st = state();
        st.authorization = Some("stale".to_string());
        apply(
            &mut st,
            "WWW-Authenticate: Digest realm=\"R\", nonce=\"N\", algorithm=SHA-256, qop=\"auth\"",
        )
        .unwrap();
        assert_eq!(st.www_authenticate, WwwAuthenticate::DigestSha256);
        assert!(st.authorization.is_none());
        let digest = st.digest.as_ref().unwrap();
        assert_eq!(digest.challenge().algorithm, Algorithm::Sha256);
        assert_eq!(st.nonce(), Some("N"));

        apply(&mut st, "WWW-Authenticate: Basic realm=\"R\"").unwrap();
        assert_eq!(st.www_authenticate, WwwAuthenticate::DigestSha256);

        apply(&mut st, "Authentication-Info: nextnonce=\"N2\"").unwrap();
        assert_eq!(st.nonce(), Some("N2"));
    }

    #[test]
    fn test_basic_challenge() {
        let mut st = state();
        apply(&mut st, "WWW-Authenticate: Basic realm=\"files\"").unwrap();
        assert_eq!(st.www_authenticate, WwwAuthenticate::Basic);

        apply(
            &mut st,
            "WWW-Authenticate: Digest realm=\"files\", nonce=\"N\", qop=\"auth\"",
        )
        .unwrap();
        assert!(st.www_authenticate.is_digest());
    }

    #[test]
    fn test_invalid_content_length_ignored() {
        let mut st = state();
        apply(&mut st, "Content-Length: -1").unwrap();
        assert_eq!(st.content_length, None);
    }
}
