//! SMTP session configuration.

use std::sync::Arc;
use std::time::Duration;

use afd_auth::AuthType;
use afd_net::tls::ClientConfig;
use afd_net::{
    ConnectOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT, IpCache, Protocol,
    ProtocolOptions,
};

/// SMTP login.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    /// User name.
    pub user: String,
    /// Password.
    pub passwd: String,
    /// [`AuthType::SmtpAuthLogin`] or [`AuthType::SmtpAuthPlain`].
    pub auth_type: AuthType,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("user", &self.user)
            .field("passwd", &"xxx")
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

/// Configuration of one SMTP session.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Server hostname (also the TLS server name).
    pub host: String,
    /// Port; defaults to 25, or 465 with implicit TLS.
    pub port: u16,
    /// Implicit TLS from the first byte.
    pub ssl_enabled: bool,
    /// Upgrade with STARTTLS when the server offers it.
    pub starttls: bool,
    /// Name sent with EHLO/HELO.
    pub client_hostname: String,
    /// Login, if the server requires one.
    pub credentials: Option<SmtpCredentials>,
    /// Protocol option flags.
    pub features: ProtocolOptions,
    /// Extra diagnostic dumps when above zero.
    pub debug_level: u8,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-read/per-write timeout.
    pub transfer_timeout: Duration,
    /// `SO_SNDBUF` / `SO_RCVBUF`.
    pub buffer_sizes: (Option<usize>, Option<usize>),
    /// Shared IP cache.
    pub ip_cache: Option<Arc<IpCache>>,
    /// Preconfigured rustls client config.
    pub tls_config: Option<Arc<ClientConfig>>,
}

impl SmtpConfig {
    /// Creates a configuration for `host` with defaults.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Protocol::Smtp.default_port(false),
            ssl_enabled: false,
            starttls: false,
            client_hostname: "localhost".to_string(),
            credentials: None,
            features: ProtocolOptions::NONE,
            debug_level: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            buffer_sizes: (None, None),
            ip_cache: None,
            tls_config: None,
        }
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SmtpConfigBuilder {
        SmtpConfigBuilder::new(host)
    }

    /// Returns the transport options for this session.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut builder = ConnectOptions::builder(Protocol::Smtp)
            .tls(self.ssl_enabled)
            .flags(self.features)
            .connect_timeout(self.connect_timeout)
            .transfer_timeout(self.transfer_timeout)
            .buffer_sizes(self.buffer_sizes.0, self.buffer_sizes.1)
            .debug_level(self.debug_level);
        if let Some(cache) = &self.ip_cache {
            builder = builder.ip_cache(Arc::clone(cache));
        }
        if let Some(config) = &self.tls_config {
            builder = builder.tls_config(Arc::clone(config));
        }
        builder.build()
    }
}

/// Builder for [`SmtpConfig`].
#[derive(Debug, Clone)]
pub struct SmtpConfigBuilder {
    config: SmtpConfig,
    port: Option<u16>,
}

impl SmtpConfigBuilder {
    /// Starts from the defaults for `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: SmtpConfig::new(host),
            port: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables implicit TLS.
    #[must_use]
    pub const fn ssl_enabled(mut self, enabled: bool) -> Self {
        self.config.ssl_enabled = enabled;
        self
    }

    /// Requests a STARTTLS upgrade.
    #[must_use]
    pub const fn starttls(mut self, enabled: bool) -> Self {
        self.config.starttls = enabled;
        self
    }

    /// Sets the EHLO name.
    #[must_use]
    pub fn client_hostname(mut self, name: impl Into<String>) -> Self {
        self.config.client_hostname = name.into();
        self
    }

    /// Sets the login.
    #[must_use]
    pub fn credentials(
        mut self,
        user: impl Into<String>,
        passwd: impl Into<String>,
        auth_type: AuthType,
    ) -> Self {
        self.config.credentials = Some(SmtpCredentials {
            user: user.into(),
            passwd: passwd.into(),
            auth_type,
        });
        self
    }

    /// Sets a protocol option.
    #[must_use]
    pub fn flag(mut self, flag: ProtocolOptions) -> Self {
        self.config.features.insert(flag);
        self
    }

    /// Sets the debug level.
    #[must_use]
    pub const fn debug_level(mut self, level: u8) -> Self {
        self.config.debug_level = level;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the transfer timeout.
    #[must_use]
    pub const fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_timeout = timeout;
        self
    }

    /// Sets socket buffer sizes.
    #[must_use]
    pub const fn buffer_sizes(mut self, send: Option<usize>, recv: Option<usize>) -> Self {
        self.config.buffer_sizes = (send, recv);
        self
    }

    /// Shares an IP cache.
    #[must_use]
    pub fn ip_cache(mut self, cache: Arc<IpCache>) -> Self {
        self.config.ip_cache = Some(cache);
        self
    }

    /// Uses a preconfigured rustls client config.
    #[must_use]
    pub fn tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.config.tls_config = Some(config);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(mut self) -> SmtpConfig {
        self.config.port = self
            .port
            .unwrap_or_else(|| Protocol::Smtp.default_port(self.config.ssl_enabled));
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(SmtpConfig::builder("mx").build().port, 25);
        assert_eq!(SmtpConfig::builder("mx").ssl_enabled(true).build().port, 465);
        assert_eq!(SmtpConfig::builder("mx").port(587).build().port, 587);
    }

    #[test]
    fn test_connect_options() {
        let config = SmtpConfig::builder("mx")
            .ssl_enabled(true)
            .flag(ProtocolOptions::TLS_STRICT_VERIFY)
            .transfer_timeout(Duration::from_secs(5))
            .build();
        let options = config.connect_options();
        assert!(options.tls);
        assert_eq!(options.protocol, Protocol::Smtp);
        assert!(options.has(ProtocolOptions::TLS_STRICT_VERIFY));
        assert_eq!(options.transfer_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let config = SmtpConfig::builder("mx")
            .credentials("alice", "pw", AuthType::SmtpAuthLogin)
            .build();
        let debug = format!("{:?}", config.credentials.unwrap());
        assert!(debug.contains("alice"));
        assert!(!debug.contains("pw\""));
    }
}
