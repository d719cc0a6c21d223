//! SMTP command builder.

use std::fmt::Write as _;

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (SASL-IR), base64 encoded
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Returns the command line without the trailing CRLF.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response,
            } => {
                let mut line = format!("AUTH {}", mechanism.as_str());
                if let Some(resp) = initial_response {
                    line.push(' ');
                    line.push_str(resp);
                }
                line
            }
            Self::MailFrom { from, size } => {
                let mut line = format!("MAIL FROM:{from}");
                if let Some(size) = size {
                    let _ = write!(line, " SIZE={size}");
                }
                line
            }
            Self::RcptTo { to } => format!("RCPT TO:{to}"),
            Self::Data => "DATA".to_string(),
            Self::Rset => "RSET".to_string(),
            Self::Noop => "NOOP".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
    }

    /// Returns true if the line carries credentials and must not be traced.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(
            self,
            Self::Auth {
                initial_response: Some(_),
                ..
            }
        )
    }

    /// Returns the command verb for logging.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::MailFrom { .. } => "MAIL FROM",
            Self::RcptTo { .. } => "RCPT TO",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings() {
        let host = "client.example.com".to_string();
        assert_eq!(
            Command::Ehlo {
                hostname: host.clone()
            }
            .to_line(),
            "EHLO client.example.com"
        );
        assert_eq!(
            Command::Helo { hostname: host }.to_line(),
            "HELO client.example.com"
        );
    }

    #[test]
    fn test_auth_plain_is_secret() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.to_line(), "AUTH PLAIN AHVzZXIAcGFzcw==");
        assert!(cmd.is_secret());

        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(cmd.to_line(), "AUTH LOGIN");
        assert!(!cmd.is_secret());
    }

    #[test]
    fn test_envelope() {
        let cmd = Command::MailFrom {
            from: Address::new("a@x").unwrap(),
            size: None,
        };
        assert_eq!(cmd.to_line(), "MAIL FROM:<a@x>");

        let cmd = Command::MailFrom {
            from: Address::null(),
            size: Some(12345),
        };
        assert_eq!(cmd.to_line(), "MAIL FROM:<> SIZE=12345");

        let cmd = Command::RcptTo {
            to: Address::new("b@y").unwrap(),
        };
        assert_eq!(cmd.to_line(), "RCPT TO:<b@y>");
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::StartTls.to_line(), "STARTTLS");
        assert_eq!(Command::Data.to_line(), "DATA");
        assert_eq!(Command::Rset.to_line(), "RSET");
        assert_eq!(Command::Noop.to_line(), "NOOP");
        assert_eq!(Command::Quit.to_line(), "QUIT");
        assert_eq!(Command::Quit.verb(), "QUIT");
    }
}
