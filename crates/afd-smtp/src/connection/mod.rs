//! SMTP session management with the type-state pattern.

mod client;

pub use client::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, SmtpConnection,
};

use std::collections::HashSet;

use crate::types::{AuthMechanism, Extension, SmtpCapabilities};

/// Server identity and capabilities from the greeting and EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
    /// Capability flags derived from the extensions.
    pub capabilities: SmtpCapabilities,
}

impl ServerInfo {
    /// Replaces the extension set from EHLO reply lines (greeting line
    /// excluded).
    pub fn update<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>, ssl_enabled: bool) {
        self.extensions = lines.into_iter().map(Extension::parse).collect();
        self.capabilities = SmtpCapabilities::from_extensions(&self.extensions, ssl_enabled);
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_from_ehlo_lines() {
        let mut info = ServerInfo::default();
        info.update(["SIZE 35882577", "8BITMIME", "AUTH LOGIN PLAIN"], false);
        assert_eq!(info.max_message_size(), Some(35_882_577));
        assert!(info.supports(&Extension::EightBitMime));
        assert_eq!(
            info.auth_mechanisms(),
            vec![AuthMechanism::Login, AuthMechanism::Plain]
        );
        assert!(info.capabilities.auth_login);
        assert!(!info.capabilities.starttls);

        info.update(["STARTTLS"], true);
        assert!(info.capabilities.starttls);
        assert!(info.capabilities.ssl_enabled);
        assert!(info.auth_mechanisms().is_empty());
    }
}
