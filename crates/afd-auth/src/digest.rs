//! HTTP Digest authentication (RFC 7616, RFC 2617).
//!
//! A [`Challenge`] is parsed from `WWW-Authenticate: Digest ...` and kept in a
//! [`DigestState`] for the rest of the session. Each request bumps the
//! nonce count, draws a fresh client nonce and produces a complete
//! `Authorization` value. `nextnonce` from `Authentication-Info` replaces the
//! stored nonce before the next request.

use std::fmt::Write as _;

use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512_256};

use crate::{Error, Result};

/// Digest hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// MD5 (the default when the challenge names none).
    #[default]
    Md5,
    /// MD5-sess.
    Md5Sess,
    /// SHA-256.
    Sha256,
    /// SHA-256-sess.
    Sha256Sess,
    /// SHA-512-256.
    Sha512_256,
    /// SHA-512-256-sess.
    Sha512_256Sess,
}

impl Algorithm {
    /// Parses an `algorithm=` token, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlgorithm`] for anything else.
    pub fn parse(token: &str) -> Result<Self> {
        const ALL: [Algorithm; 6] = [
            Algorithm::Md5,
            Algorithm::Md5Sess,
            Algorithm::Sha256,
            Algorithm::Sha256Sess,
            Algorithm::Sha512_256,
            Algorithm::Sha512_256Sess,
        ];
        ALL.into_iter()
            .find(|alg| alg.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| Error::UnsupportedAlgorithm(token.to_string()))
    }

    /// Returns the token as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
            Self::Sha512_256 => "SHA-512-256",
            Self::Sha512_256Sess => "SHA-512-256-sess",
        }
    }

    /// Returns true for the `-sess` variants.
    #[must_use]
    pub const fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess | Self::Sha512_256Sess)
    }

    /// Hashes `data` and returns lowercase hex.
    #[must_use]
    pub fn hash(self, data: &[u8]) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex(&Md5::digest(data)),
            Self::Sha256 | Self::Sha256Sess => hex(&Sha256::digest(data)),
            Self::Sha512_256 | Self::Sha512_256Sess => hex(&Sha512_256::digest(data)),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Quality of protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qop {
    /// Authentication only.
    Auth,
    /// Authentication with integrity protection of the entity body.
    AuthInt,
}

impl Qop {
    /// Returns the wire token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
        }
    }
}

/// Parameters of a `Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Challenge {
    /// Protection space.
    pub realm: String,
    /// Server nonce.
    pub nonce: String,
    /// Opaque value to echo back.
    pub opaque: Option<String>,
    /// Hash algorithm.
    pub algorithm: Algorithm,
    /// Server offers `qop=auth`.
    pub qop_auth: bool,
    /// Server offers `qop=auth-int`.
    pub qop_auth_int: bool,
    /// Server wants the user name hashed.
    pub userhash: bool,
    /// The previous nonce was stale.
    pub stale: bool,
}

impl Challenge {
    /// Parses a challenge, with or without the leading `Digest` scheme name.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed parameters, an unknown algorithm, an
    /// unknown-only qop list, or a missing `realm`/`nonce`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let rest = match value.get(..6) {
            Some(scheme) if scheme.eq_ignore_ascii_case("digest") => &value[6..],
            _ => value,
        };

        let mut challenge = Self::default();
        let mut realm = None;
        let mut nonce = None;
        let mut qop_seen = false;
        for (key, val) in parse_params(rest)? {
            match key.as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => challenge.opaque = Some(val),
                "algorithm" => challenge.algorithm = Algorithm::parse(&val)?,
                "qop" => {
                    qop_seen = true;
                    for token in val.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
                        if token.eq_ignore_ascii_case("auth") {
                            challenge.qop_auth = true;
                        } else if token.eq_ignore_ascii_case("auth-int") {
                            challenge.qop_auth_int = true;
                        }
                    }
                }
                "userhash" => challenge.userhash = val.eq_ignore_ascii_case("true"),
                "stale" => challenge.stale = val.eq_ignore_ascii_case("true"),
                _ => tracing::trace!(key, "ignoring digest parameter"),
            }
        }
        if qop_seen && !challenge.qop_auth && !challenge.qop_auth_int {
            return Err(Error::UnsupportedQop(
                "no known qop value offered".to_string(),
            ));
        }
        challenge.realm = realm.ok_or(Error::MissingParameter("realm"))?;
        challenge.nonce = nonce.ok_or(Error::MissingParameter("nonce"))?;
        Ok(challenge)
    }

    /// Returns true if the server negotiates a qop at all.
    #[must_use]
    pub const fn has_qop(&self) -> bool {
        self.qop_auth || self.qop_auth_int
    }
}

/// Splits a comma-separated `key=value` list.
///
/// Values may be quoted (with `\` escapes) or bare; a bare value ends at the
/// next `,` or the end of input. Keys are lowercased.
///
/// # Errors
///
/// Returns [`Error::MalformedChallenge`] for an unterminated quoted string
/// or a missing key.
pub fn parse_params(input: &str) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| *c == ',' || c.is_whitespace()).is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };

        let mut end = input.len();
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' || c == ',' || c.is_whitespace() {
                end = i;
                break;
            }
            chars.next();
        }
        let key = input[start..end].to_ascii_lowercase();
        if key.is_empty() {
            return Err(Error::MalformedChallenge(format!(
                "missing parameter name at offset {start}"
            )));
        }

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next_if(|(_, c)| *c == '=').is_none() {
            params.push((key, String::new()));
            continue;
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let value = if chars.next_if(|(_, c)| *c == '"').is_some() {
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(Error::MalformedChallenge(format!(
                    "unterminated quoted value for `{key}`"
                )));
            }
            value
        } else {
            let begin = chars.peek().map_or(input.len(), |&(i, _)| i);
            let mut stop = input.len();
            while let Some(&(i, c)) = chars.peek() {
                if c == ',' {
                    stop = i;
                    break;
                }
                chars.next();
            }
            input[begin..stop].trim_end().to_string()
        };
        params.push((key, value));
    }
    Ok(params)
}

/// Caller preferences for digest negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigestOptions {
    /// Use `auth-int` when the server offers it and the body is known.
    pub prefer_auth_int: bool,
}

/// Digest session state kept across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestState {
    challenge: Challenge,
    nc: u32,
    cnonce: String,
}

impl DigestState {
    /// Starts a session from a challenge.
    #[must_use]
    pub const fn new(challenge: Challenge) -> Self {
        Self {
            challenge,
            nc: 0,
            cnonce: String::new(),
        }
    }

    /// Replaces the challenge after a new 401; the nonce count keeps
    /// increasing.
    pub fn update(&mut self, challenge: Challenge) {
        self.challenge = challenge;
    }

    /// Returns the stored challenge.
    #[must_use]
    pub const fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// Returns the last nonce count used.
    #[must_use]
    pub const fn nc(&self) -> u32 {
        self.nc
    }

    /// Returns the last client nonce used.
    #[must_use]
    pub fn cnonce(&self) -> &str {
        &self.cnonce
    }

    /// Restarts the nonce count, e.g. after a reconnect.
    pub const fn reset_count(&mut self) {
        self.nc = 0;
    }

    /// Picks the qop for the next request.
    ///
    /// `body_known` is false when the entity body is streamed later and
    /// therefore cannot be hashed up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedQop`] if only `auth-int` is offered and
    /// the body is unknown.
    pub fn select_qop(&self, options: DigestOptions, body_known: bool) -> Result<Option<Qop>> {
        let ch = &self.challenge;
        if !ch.has_qop() {
            return Ok(None);
        }
        if options.prefer_auth_int && ch.qop_auth_int && body_known {
            return Ok(Some(Qop::AuthInt));
        }
        if ch.qop_auth {
            return Ok(Some(Qop::Auth));
        }
        if body_known {
            return Ok(Some(Qop::AuthInt));
        }
        Err(Error::UnsupportedQop(
            "auth-int requires the entity body up front".to_string(),
        ))
    }

    /// Builds the `Authorization` value for one request.
    ///
    /// `body` is the complete entity body if known (`Some(&[])` for
    /// bodiless requests), `None` if it will be streamed.
    ///
    /// # Errors
    ///
    /// See [`DigestState::select_qop`].
    pub fn authorize(
        &mut self,
        user: &str,
        passwd: &str,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
        options: DigestOptions,
    ) -> Result<String> {
        let qop = self.select_qop(options, body.is_some())?;
        self.nc = self.nc.wrapping_add(1).max(1);
        self.cnonce = generate_cnonce();
        Ok(self.header_value(user, passwd, method, uri, body.unwrap_or_default(), qop))
    }

    /// Computes the `response=` digest with the current nc and cnonce.
    #[must_use]
    pub fn response(
        &self,
        user: &str,
        passwd: &str,
        method: &str,
        uri: &str,
        body: &[u8],
        qop: Option<Qop>,
    ) -> String {
        let ch = &self.challenge;
        let alg = ch.algorithm;
        let mut a1 = alg.hash(format!("{user}:{}:{passwd}", ch.realm).as_bytes());
        if alg.is_session() {
            a1 = alg.hash(format!("{a1}:{}:{}", ch.nonce, self.cnonce).as_bytes());
        }
        let a2 = match qop {
            Some(Qop::AuthInt) => {
                alg.hash(format!("{method}:{uri}:{}", alg.hash(body)).as_bytes())
            }
            _ => alg.hash(format!("{method}:{uri}").as_bytes()),
        };
        match qop {
            Some(qop) => alg.hash(
                format!(
                    "{a1}:{}:{:08x}:{}:{}:{a2}",
                    ch.nonce,
                    self.nc,
                    self.cnonce,
                    qop.as_str()
                )
                .as_bytes(),
            ),
            None => alg.hash(format!("{a1}:{}:{a2}", ch.nonce).as_bytes()),
        }
    }

    fn header_value(
        &self,
        user: &str,
        passwd: &str,
        method: &str,
        uri: &str,
        body: &[u8],
        qop: Option<Qop>,
    ) -> String {
        let ch = &self.challenge;
        let username = if ch.userhash {
            ch.algorithm
                .hash(format!("{user}:{}", ch.realm).as_bytes())
        } else {
            user.to_string()
        };
        let response = self.response(user, passwd, method, uri, body, qop);

        let mut value = format!(
            "Digest username={}, realm={}, nonce={}, uri={}",
            quote(&username),
            quote(&ch.realm),
            quote(&ch.nonce),
            quote(uri)
        );
        if let Some(qop) = qop {
            let _ = write!(
                value,
                ", qop={}, nc={:08x}, cnonce=\"{}\"",
                qop.as_str(),
                self.nc,
                self.cnonce
            );
        }
        let _ = write!(value, ", response=\"{response}\"");
        if let Some(opaque) = &ch.opaque {
            let _ = write!(value, ", opaque={}", quote(opaque));
        }
        let _ = write!(value, ", algorithm={}", ch.algorithm.as_str());
        if ch.userhash {
            value.push_str(", userhash=true");
        }
        value
    }

    /// Applies an `Authentication-Info` header.
    ///
    /// Returns true if a `nextnonce` replaced the stored nonce.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedChallenge`] if the header cannot be parsed.
    pub fn apply_authentication_info(&mut self, value: &str) -> Result<bool> {
        for (key, val) in parse_params(value)? {
            if key == "nextnonce" && !val.is_empty() {
                tracing::debug!("digest nonce replaced by nextnonce");
                self.challenge.nonce = val;
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[cfg(test)]
    pub(crate) fn with_counters(mut self, nc: u32, cnonce: &str) -> Self {
        self.nc = nc;
        self.cnonce = cnonce.to_string();
        self
    }
}

/// Returns 16 random hex digits.
fn generate_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    hex(&bytes)
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
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

    const RFC7616_NONCE: &str = "7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v";
    const RFC7616_CNONCE: &str = "f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ";

    fn state(header: &str) -> DigestState {
        DigestState::new(Challenge::parse(header).unwrap())
    }

    #[test]
    fn test_rfc2617_md5_vector() {
        let s = state(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .with_counters(1, "0a4f113b");
        let response = s.response(
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            b"",
            Some(Qop::Auth),
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_rfc7616_sha256_vector() {
        let header = format!(
            r#"Digest realm="http-auth@example.org", qop="auth, auth-int", algorithm=SHA-256, nonce="{RFC7616_NONCE}", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#
        );
        let s = state(&header).with_counters(1, RFC7616_CNONCE);
        assert_eq!(s.challenge().algorithm, Algorithm::Sha256);
        let response = s.response(
            "Mufasa",
            "Circle of Life",
            "GET",
            "/dir/index.html",
            b"",
            Some(Qop::Auth),
        );
        assert_eq!(
            response,
            "753927fa0e85d155564e2e272a28d1802ca10daf4496794697cf8db5856cb6c1"
        );
    }

    #[test]
    fn test_rfc7616_md5_vector() {
        let header = format!(
            r#"Digest realm="http-auth@example.org", qop="auth, auth-int", algorithm=MD5, nonce="{RFC7616_NONCE}""#
        );
        let s = state(&header).with_counters(1, RFC7616_CNONCE);
        let response = s.response(
            "Mufasa",
            "Circle of Life",
            "GET",
            "/dir/index.html",
            b"",
            Some(Qop::Auth),
        );
        assert_eq!(response, "8ca523f5e9506fed4657c9700eebdbec");
    }

    #[test]
    fn test_without_qop() {
        let s = state(r#"Digest realm="R", nonce="N""#);
        assert!(!s.challenge().has_qop());
        let response = s.response("u", "p", "GET", "/x", b"", None);
        assert_eq!(response, "a0e96efdac32e3c37e4c1f13c42654a4");
    }

    #[test]
    fn test_session_variant() {
        let s = state(r#"Digest realm="R", nonce="N", qop="auth", algorithm=SHA-256-sess"#)
            .with_counters(2, "0123456789abcdef");
        let response = s.response("u", "p", "GET", "/x", b"", Some(Qop::Auth));
        assert_eq!(
            response,
            "6d608b9955d575f01eaf95cef4d1de94f66f19feb4119cc2272f490ed9ed9576"
        );
    }

    #[test]
    fn test_sha256_auth_vector() {
        let s = state(r#"Digest realm="R", nonce="N", qop="auth", algorithm=SHA-256"#)
            .with_counters(1, "0123456789abcdef");
        let response = s.response("u", "p", "GET", "/x", b"", Some(Qop::Auth));
        assert_eq!(
            response,
            "c954e38d518d46950beb4e94aba85dc06a3b032d5f5f65eeab28aadc856eca14"
        );
    }

    #[test]
    fn test_auth_int_hashes_body() {
        let s = state(r#"Digest realm="R", nonce="N", qop="auth-int", algorithm=SHA-512-256"#)
            .with_counters(1, "0123456789abcdef");
        let response = s.response("u", "p", "DELETE", "/x", b"", Some(Qop::AuthInt));
        assert_eq!(
            response,
            "f4edb575a3eb4db135446e0cb376baa3bf062e7ce3d8083ce2e591963541d8c1"
        );
    }

    #[test]
    fn test_header_format_and_counter() {
        let mut s = state(r#"Digest realm="R", nonce="N", qop="auth", algorithm=SHA-256"#);
        let first = s
            .authorize("u", "p", "GET", "/x", Some(b"".as_slice()), DigestOptions::default())
            .unwrap();
        assert!(first.starts_with(
            r#"Digest username="u", realm="R", nonce="N", uri="/x", qop=auth, nc=00000001, cnonce=""#
        ));
        assert!(first.ends_with(", algorithm=SHA-256"));
        assert_eq!(s.cnonce().len(), 16);
        assert!(s.cnonce().chars().all(|c| c.is_ascii_hexdigit()));

        let expected = s.response("u", "p", "GET", "/x", b"", Some(Qop::Auth));
        assert!(first.contains(&format!("response=\"{expected}\"")));

        let second = s
            .authorize("u", "p", "GET", "/x", Some(b"".as_slice()), DigestOptions::default())
            .unwrap();
        assert!(second.contains("nc=00000002"));
        assert_eq!(s.nc(), 2);
        s.reset_count();
        assert_eq!(s.nc(), 0);
    }

    #[test]
    fn test_userhash_and_opaque() {
        let mut s = state(
            r#"Digest realm="R", nonce="N", qop="auth", algorithm=SHA-256, userhash=true, opaque="OP""#,
        );
        let value = s
            .authorize("u", "p", "GET", "/x", Some(b"".as_slice()), DigestOptions::default())
            .unwrap();
        assert!(value.contains(
            r#"username="7bd97a95c5f57546df7639c6bace452d3882c73ada2108f9917d19d2fe22cf8f""#
        ));
        assert!(value.contains(r#"opaque="OP""#));
        assert!(value.ends_with("userhash=true"));
    }

    #[test]
    fn test_qop_selection() {
        let both = state(r#"Digest realm="R", nonce="N", qop="auth,auth-int""#);
        assert_eq!(
            both.select_qop(DigestOptions::default(), true).unwrap(),
            Some(Qop::Auth)
        );
        let prefer = DigestOptions {
            prefer_auth_int: true,
        };
        assert_eq!(both.select_qop(prefer, true).unwrap(), Some(Qop::AuthInt));
        assert_eq!(both.select_qop(prefer, false).unwrap(), Some(Qop::Auth));

        let int_only = state(r#"Digest realm="R", nonce="N", qop="auth-int""#);
        assert!(matches!(
            int_only.select_qop(DigestOptions::default(), false),
            Err(Error::UnsupportedQop(_))
        ));
    }

    #[test]
    fn test_nextnonce_replaces_nonce() {
        let mut s = state(r#"Digest realm="R", nonce="old", qop=auth"#);
        let replaced = s
            .apply_authentication_info(r#"nextnonce="new", qop=auth, rspauth="abc""#)
            .unwrap();
        assert!(replaced);
        assert_eq!(s.challenge().nonce, "new");
        assert!(!s.apply_authentication_info("qop=auth").unwrap());
    }

    #[test]
    fn test_algorithm_token_ends_at_comma() {
        let ch = Challenge::parse("Digest realm=R,algorithm=sha-256,nonce=abc").unwrap();
        assert_eq!(ch.algorithm, Algorithm::Sha256);
        assert_eq!(ch.realm, "R");
        assert_eq!(ch.nonce, "abc");
        let ch = Challenge::parse(r#"realm="R", nonce="n", algorithm=MD5-sess"#).unwrap();
        assert_eq!(ch.algorithm, Algorithm::Md5Sess);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Challenge::parse(r#"Digest realm="R""#),
            Err(Error::MissingParameter("nonce"))
        ));
        assert!(matches!(
            Challenge::parse(r#"Digest realm="R", nonce="N", algorithm=SHA-1"#),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            Challenge::parse(r#"Digest realm="R, nonce=N"#),
            Err(Error::MalformedChallenge(_))
        ));
        assert!(matches!(
            Challenge::parse(r#"Digest realm="R", nonce="N", qop="token""#),
            Err(Error::UnsupportedQop(_))
        ));
    }

    #[test]
    fn test_quoted_escapes() {
        let params = parse_params(r#"realm="a \"b\" c", stale=TRUE"#).unwrap();
        assert_eq!(params[0], ("realm".to_string(), r#"a "b" c"#.to_string()));
        assert_eq!(params[1], ("stale".to_string(), "TRUE".to_string()));
        assert_eq!(quote(r#"a "b""#), r#""a \"b\"""#);
    }
}
