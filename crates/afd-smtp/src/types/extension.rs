//! EHLO capability parsing.

use std::collections::HashSet;

/// SMTP extension advertised in an EHLO reply line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// DSN - Delivery status notifications
    Dsn,
    /// Unknown extension
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from an EHLO reply.
    ///
    /// Keywords are matched case-insensitively. `AUTH=LOGIN` as sent by
    /// some older servers is treated like `AUTH LOGIN`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line
            .split(|c: char| c.is_ascii_whitespace() || c == '=')
            .filter(|p| !p.is_empty())
            .collect();
        let Some(keyword) = parts.first() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(
                parts[1..]
                    .iter()
                    .filter_map(|m| AuthMechanism::parse(m))
                    .collect(),
            ),
            "SIZE" => Self::Size(parts.get(1).and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            "DSN" => Self::Dsn,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - RFC 4616
    Plain,
    /// LOGIN - legacy base64 user/password exchange
    Login,
    /// CRAM-MD5 - advertised but not used
    CramMd5,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
        }
    }
}

/// Capability summary of one SMTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct SmtpCapabilities {
    /// Server offers `AUTH LOGIN`.
    pub auth_login: bool,
    /// Server offers `AUTH PLAIN`.
    pub auth_plain: bool,
    /// Server offers `STARTTLS`.
    pub starttls: bool,
    /// The session runs over TLS (implicit or after STARTTLS).
    pub ssl_enabled: bool,
}

impl SmtpCapabilities {
    /// Derives the capability flags from parsed extensions.
    #[must_use]
    pub fn from_extensions(extensions: &HashSet<Extension>, ssl_enabled: bool) -> Self {
        let mut caps = Self {
            ssl_enabled,
            ..Self::default()
        };
        for ext in extensions {
            match ext {
                Extension::StartTls => caps.starttls = true,
                Extension::Auth(mechanisms) => {
                    caps.auth_login |= mechanisms.contains(&AuthMechanism::Login);
                    caps.auth_plain |= mechanisms.contains(&AuthMechanism::Plain);
                }
                _ => {}
            }
        }
        caps
    }
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

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn parse_starttls_any_case() {
            assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        }

        #[test]
        fn parse_auth_any_order() {
            let Extension::Auth(mechs) = Extension::parse("AUTH plain CRAM-MD5 Login") else {
                panic!("Expected Auth variant");
            };
            assert_eq!(
                mechs,
                vec![
                    AuthMechanism::Plain,
                    AuthMechanism::CramMd5,
                    AuthMechanism::Login
                ]
            );
        }

        #[test]
        fn parse_auth_equals_form() {
            let Extension::Auth(mechs) = Extension::parse("AUTH=LOGIN") else {
                panic!("Expected Auth variant");
            };
            assert_eq!(mechs, vec![AuthMechanism::Login]);
        }

        #[test]
        fn parse_size() {
            assert_eq!(
                Extension::parse("SIZE 52428800"),
                Extension::Size(Some(52_428_800))
            );
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        }

        #[test]
        fn parse_other_keywords() {
            assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
            assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
            assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
            assert_eq!(Extension::parse("DSN"), Extension::Dsn);
            assert_eq!(
                Extension::parse("X-CUSTOM 1"),
                Extension::Unknown("X-CUSTOM 1".to_string())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }

    #[test]
    fn capabilities_from_extensions() {
        let exts: HashSet<Extension> = ["SIZE 1000", "STARTTLS", "AUTH LOGIN PLAIN"]
            .iter()
            .map(|l| Extension::parse(l))
            .collect();
        let caps = SmtpCapabilities::from_extensions(&exts, false);
        assert!(caps.starttls);
        assert!(caps.auth_login);
        assert!(caps.auth_plain);
        assert!(!caps.ssl_enabled);

        let caps = SmtpCapabilities::from_extensions(&HashSet::new(), true);
        assert_eq!(
            caps,
            SmtpCapabilities {
                ssl_enabled: true,
                ..SmtpCapabilities::default()
            }
        );
    }

    #[test]
    fn mechanism_names() {
        assert_eq!(AuthMechanism::parse("login"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::parse("XOAUTH2"), None);
        assert_eq!(AuthMechanism::Plain.as_str(), "PLAIN");
        assert_eq!(AuthMechanism::CramMd5.as_str(), "CRAM-MD5");
    }
}
