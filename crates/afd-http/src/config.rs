//! HTTP client configuration.

use std::sync::Arc;
use std::time::Duration;

use afd_auth::{AuthType, DigestOptions, ListVersion};
use afd_net::tls::ClientConfig;
use afd_net::{
    ConnectOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT, IpCache, Protocol,
    ProtocolOptions,
};

/// User name, password and scheme for one host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name, or the S3 access key.
    pub user: String,
    /// Password, or the S3 secret key.
    pub passwd: String,
    /// Scheme to use.
    pub auth_type: AuthType,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("passwd", &"xxx")
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, passwd: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            user: user.into(),
            passwd: passwd.into(),
            auth_type,
        }
    }

    /// Returns true if a user name is set.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.user.is_empty()
    }
}

/// Configuration of one HTTP session.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Logical hostname (Host header, SNI).
    pub host: String,
    /// Port; defaults to 80 or 443.
    pub port: u16,
    /// Connect over TLS.
    pub tls: bool,
    /// Forward proxy to dial instead of the host.
    pub proxy: Option<(String, u16)>,
    /// Credentials and scheme.
    pub credentials: Credentials,
    /// Protocol option flags.
    pub features: ProtocolOptions,
    /// Extra diagnostic dumps when above zero.
    pub debug_level: u8,
    /// AWS region for signing.
    pub region: String,
    /// AWS service name for signing.
    pub service: String,
    /// S3 LIST API version.
    pub listobject_version: ListVersion,
    /// Digest negotiation preferences.
    pub digest: DigestOptions,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-read/per-write timeout.
    pub transfer_timeout: Duration,
    /// `SO_SNDBUF` / `SO_RCVBUF`.
    pub buffer_sizes: (Option<usize>, Option<usize>),
    /// TCP keepalive interval, used with [`ProtocolOptions::KEEPALIVE`].
    pub keepalive_interval: Option<Duration>,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Shared IP cache.
    pub ip_cache: Option<Arc<IpCache>>,
    /// Preconfigured rustls client config.
    pub tls_config: Option<Arc<ClientConfig>>,
}

impl HttpConfig {
    /// Creates a configuration for `host` with defaults.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Protocol::Http.default_port(false),
            tls: false,
            proxy: None,
            credentials: Credentials::default(),
            features: ProtocolOptions::NONE,
            debug_level: 0,
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            listobject_version: ListVersion::V2,
            digest: DigestOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            buffer_sizes: (None, None),
            keepalive_interval: None,
            user_agent: format!("AFD/{}", env!("CARGO_PKG_VERSION")),
            ip_cache: None,
            tls_config: None,
        }
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> HttpConfigBuilder {
        HttpConfigBuilder::new(host)
    }

    /// Returns true if `flag` is set.
    #[must_use]
    pub const fn has(&self, flag: ProtocolOptions) -> bool {
        self.features.contains(flag)
    }

    /// Returns the `Host` header value; the port is appended when it is not
    /// the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.port == Protocol::Http.default_port(self.tls) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the transport options for this session.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut builder = ConnectOptions::builder(Protocol::Http)
            .tls(self.tls)
            .flags(self.features)
            .connect_timeout(self.connect_timeout)
            .transfer_timeout(self.transfer_timeout)
            .buffer_sizes(self.buffer_sizes.0, self.buffer_sizes.1)
            .debug_level(self.debug_level);
        if let Some(interval) = self.keepalive_interval {
            builder = builder.keepalive(interval);
        }
        if let Some((host, port)) = &self.proxy {
            builder = builder.proxy(host.clone(), *port);
        }
        if let Some(cache) = &self.ip_cache {
            builder = builder.ip_cache(Arc::clone(cache));
        }
        if let Some(config) = &self.tls_config {
            builder = builder.tls_config(Arc::clone(config));
        }
        builder.build()
    }
}

/// Builder for [`HttpConfig`].
#[derive(Debug, Clone)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
    port: Option<u16>,
}

impl HttpConfigBuilder {
    /// Starts from the defaults for `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: HttpConfig::new(host),
            port: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables TLS.
    #[must_use]
    pub const fn tls(mut self, tls: bool) -> Self {
        self.config.tls = tls;
        self
    }

    /// Routes requests through a forward proxy.
    #[must_use]
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.proxy = Some((host.into(), port));
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Sets a protocol option flag.
    #[must_use]
    pub fn flag(mut self, flag: ProtocolOptions) -> Self {
        self.config.features.insert(flag);
        self
    }

    /// Replaces all protocol option flags.
    #[must_use]
    pub const fn features(mut self, features: ProtocolOptions) -> Self {
        self.config.features = features;
        self
    }

    /// Sets the debug level.
    #[must_use]
    pub const fn debug_level(mut self, level: u8) -> Self {
        self.config.debug_level = level;
        self
    }

    /// Sets the AWS region.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    /// Sets the AWS service name.
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    /// Sets the S3 LIST version.
    #[must_use]
    pub const fn listobject_version(mut self, version: ListVersion) -> Self {
        self.config.listobject_version = version;
        self
    }

    /// Sets digest preferences.
    #[must_use]
    pub const fn digest(mut self, options: DigestOptions) -> Self {
        self.config.digest = options;
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

    /// Enables TCP keepalive with the given interval.
    #[must_use]
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = Some(interval);
        self.config.features.insert(ProtocolOptions::KEEPALIVE);
        self
    }

    /// Overrides the `User-Agent` value.
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
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
    pub fn build(mut self) -> HttpConfig {
        self.config.port = self
            .port
            .unwrap_or_else(|| Protocol::Http.default_port(self.config.tls));
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(HttpConfig::builder("h").build().port, 80);
        assert_eq!(HttpConfig::builder("h").tls(true).build().port, 443);
        assert_eq!(HttpConfig::builder("h").port(8080).build().port, 8080);
    }

    #[test]
    fn test_host_header() {
        assert_eq!(HttpConfig::builder("s3.example").build().host_header(), "s3.example");
        assert_eq!(
            HttpConfig::builder("s3.example").port(9000).build().host_header(),
            "s3.example:9000"
        );
    }

    #[test]
    fn test_connect_options_carry_flags() {
        let config = HttpConfig::builder("h")
            .flag(ProtocolOptions::NO_EXPECT)
            .keepalive(Duration::from_secs(30))
            .proxy("proxy", 3128)
            .build();
        let options = config.connect_options();
        assert!(options.has(ProtocolOptions::NO_EXPECT));
        assert!(options.has(ProtocolOptions::KEEPALIVE));
        assert_eq!(options.proxy, Some(("proxy".to_string(), 3128)));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("u", "secret", AuthType::Basic);
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
