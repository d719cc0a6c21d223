//! Parsed server replies.

use std::fmt;

use crate::error::Error;

/// Separator between the lines of a folded multi-line reply.
const FOLD_SEPARATOR: &str = " / ";

/// One complete server reply, possibly spread over several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code shared by every line.
    pub code: ReplyCode,
    /// Text of each line after the code and separator.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a reply from its code and line texts.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true for a 2xx reply.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the text of the final line.
    #[must_use]
    pub fn last_line(&self) -> &str {
        self.message.last().map_or("", String::as_str)
    }

    /// Folds all lines into one trace line, skipping blank ones.
    ///
    /// `250-mx.test` / `250 SIZE 1000` becomes `mx.test / SIZE 1000`.
    #[must_use]
    pub fn folded(&self) -> String {
        self.message
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(FOLD_SEPARATOR)
    }

    /// Converts the reply into the error reported to the caller.
    ///
    /// The error carries the final line, which is where servers put the
    /// actual reason.
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::reply(self.code.as_u16(), self.last_line())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.folded())
    }
}

/// Three-digit reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 greeting and STARTTLS go-ahead.
    pub const SERVICE_READY: Self = Self(220);
    /// 221 answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// 235 login accepted.
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 command completed.
    pub const OK: Self = Self(250);
    /// 334 server waits for the next login step.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 server waits for the message body.
    pub const START_DATA: Self = Self(354);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true for 2xx.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true for 5xx, where retrying the same command is pointless.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use afd_net::ExitCode;

    fn reply(code: u16, lines: &[&str]) -> Reply {
        Reply::new(
            ReplyCode::new(code),
            lines.iter().map(ToString::to_string).collect(),
        )
    }

    #[test]
    fn test_folded_multiline() {
        let ehlo = reply(250, &["mx.example.com", "  ", "STARTTLS ", "AUTH LOGIN"]);
        assert_eq!(ehlo.folded(), "mx.example.com / STARTTLS / AUTH LOGIN");
        assert_eq!(ehlo.to_string(), "250 mx.example.com / STARTTLS / AUTH LOGIN");
        assert_eq!(ehlo.last_line(), "AUTH LOGIN");
    }

    #[test]
    fn test_folded_empty() {
        let bare = reply(250, &[]);
        assert_eq!(bare.folded(), "");
        assert_eq!(bare.last_line(), "");
        assert_eq!(reply(221, &["", ""]).folded(), "");
    }

    #[test]
    fn test_to_error_uses_last_line() {
        let err = reply(550, &["5.1.1 no such user", "5.1.1 mailbox unavailable"]).to_error();
        assert!(err.is_permanent());
        assert_eq!(err.exit_code(), ExitCode::Reply(550));
        assert_eq!(err.to_string(), "SMTP error 550: 5.1.1 mailbox unavailable");

        assert!(reply(451, &["try later"]).to_error().is_transient());
    }

    #[test]
    fn test_code_classes() {
        assert!(ReplyCode::OK.is_success());
        assert!(ReplyCode::CLOSING.is_success());
        assert!(!ReplyCode::AUTH_CONTINUE.is_success());
        assert!(!ReplyCode::START_DATA.is_permanent());
        assert!(ReplyCode::new(535).is_permanent());
        assert!(!ReplyCode::new(421).is_permanent());
        assert_eq!(ReplyCode::new(554).as_u16(), 554);
        assert_eq!(ReplyCode::SERVICE_READY.to_string(), "220");
    }
}
