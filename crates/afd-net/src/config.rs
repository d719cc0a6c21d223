//! Connection configuration types.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

use crate::resolve::IpCache;

/// Default transfer timeout applied to every read and write.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Application protocol spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// HTTP/1.1, optionally over TLS.
    #[default]
    Http,
    /// SMTP, optionally over TLS.
    Smtp,
}

impl Protocol {
    /// Returns the default port for this protocol.
    #[must_use]
    pub const fn default_port(self, tls: bool) -> u16 {
        match (self, tls) {
            (Self::Http, false) => 80,
            (Self::Http, true) => 443,
            (Self::Smtp, false) => 25,
            (Self::Smtp, true) => 465,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("HTTP"),
            Self::Smtp => f.write_str("SMTP"),
        }
    }
}

/// Per-connection protocol option flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProtocolOptions(u32);

impl ProtocolOptions {
    /// No options set.
    pub const NONE: Self = Self(0);
    /// Resolver restricted to IPv4.
    pub const DISABLE_IPV6: Self = Self(1);
    /// Peer certificate must verify.
    pub const TLS_STRICT_VERIFY: Self = Self(1 << 1);
    /// Allow legacy TLS renegotiation.
    pub const TLS_LEGACY_RENEGOTIATION: Self = Self(1 << 2);
    /// Do not send `Expect: 100-continue` on PUT.
    pub const NO_EXPECT: Self = Self(1 << 3);
    /// First path segment is the S3 bucket name.
    pub const BUCKETNAME_IS_IN_PATH: Self = Self(1 << 4);
    /// Omit `delimiter=/` from S3 LIST queries.
    pub const NO_DELIMITER: Self = Self(1 << 5);
    /// Enable `SO_KEEPALIVE` on the socket.
    pub const KEEPALIVE: Self = Self(1 << 6);

    /// Creates a flag set from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for ProtocolOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProtocolOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Lowest TLS protocol version that may be negotiated.
///
/// SSLv2, SSLv3, TLS 1.0 and TLS 1.1 are never offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TlsFloor {
    /// TLS 1.2 and TLS 1.3.
    #[default]
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

/// Options used when opening a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Protocol spoken on the connection.
    pub protocol: Protocol,
    /// Negotiate TLS immediately after connecting.
    pub tls: bool,
    /// Protocol option flags.
    pub flags: ProtocolOptions,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Timeout for each individual read or write.
    pub transfer_timeout: Duration,
    /// `SO_SNDBUF` to set before connecting.
    pub send_buffer_size: Option<usize>,
    /// `SO_RCVBUF` to set before connecting.
    pub recv_buffer_size: Option<usize>,
    /// Keepalive idle time, used when [`ProtocolOptions::KEEPALIVE`] is set.
    pub keepalive_interval: Option<Duration>,
    /// Minimum TLS version.
    pub tls_floor: TlsFloor,
    /// Proxy to dial instead of the logical host.
    pub proxy: Option<(String, u16)>,
    /// Trace verbosity; values above zero enable header dumps.
    pub debug_level: u8,
    /// Optional IP cache owned by the caller.
    pub ip_cache: Option<Arc<IpCache>>,
    /// Pre-built TLS client configuration shared across connections.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            tls: false,
            flags: ProtocolOptions::NONE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            send_buffer_size: None,
            recv_buffer_size: None,
            keepalive_interval: None,
            tls_floor: TlsFloor::Tls12,
            proxy: None,
            debug_level: 0,
            ip_cache: None,
            tls_config: None,
        }
    }
}

impl ConnectOptions {
    /// Creates options for the given protocol with default timeouts.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    /// Creates an options builder.
    #[must_use]
    pub fn builder(protocol: Protocol) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(protocol)
    }

    /// Returns true if the flag is set.
    #[must_use]
    pub const fn has(&self, flag: ProtocolOptions) -> bool {
        self.flags.contains(flag)
    }
}

/// Builder for [`ConnectOptions`].
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    options: ConnectOptions,
}

impl ConnectOptionsBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            options: ConnectOptions::new(protocol),
        }
    }

    /// Enables implicit TLS.
    #[must_use]
    pub const fn tls(mut self, tls: bool) -> Self {
        self.options.tls = tls;
        self
    }

    /// Sets a protocol option flag.
    #[must_use]
    pub fn flag(mut self, flag: ProtocolOptions) -> Self {
        self.options.flags |= flag;
        self
    }

    /// Replaces all protocol option flags.
    #[must_use]
    pub const fn flags(mut self, flags: ProtocolOptions) -> Self {
        self.options.flags = flags;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Sets the transfer timeout.
    #[must_use]
    pub const fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.options.transfer_timeout = timeout;
        self
    }

    /// Sets `SO_SNDBUF` and `SO_RCVBUF`.
    #[must_use]
    pub const fn buffer_sizes(mut self, send: Option<usize>, recv: Option<usize>) -> Self {
        self.options.send_buffer_size = send;
        self.options.recv_buffer_size = recv;
        self
    }

    /// Enables TCP keepalive with the given idle interval.
    #[must_use]
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.options.flags |= ProtocolOptions::KEEPALIVE;
        self.options.keepalive_interval = Some(interval);
        self
    }

    /// Sets the minimum TLS version.
    #[must_use]
    pub const fn tls_floor(mut self, floor: TlsFloor) -> Self {
        self.options.tls_floor = floor;
        self
    }

    /// Dials the given proxy instead of the target host.
    #[must_use]
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.options.proxy = Some((host.into(), port));
        self
    }

    /// Sets the debug level.
    #[must_use]
    pub const fn debug_level(mut self, level: u8) -> Self {
        self.options.debug_level = level;
        self
    }

    /// Attaches a shared IP cache.
    #[must_use]
    pub fn ip_cache(mut self, cache: Arc<IpCache>) -> Self {
        self.options.ip_cache = Some(cache);
        self
    }

    /// Uses a pre-built TLS client configuration.
    #[must_use]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.options.tls_config = Some(config);
        self
    }

    /// Builds the options.
    #[must_use]
    pub fn build(self) -> ConnectOptions {
        self.options
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

    #[test]
    fn test_default_ports() {
        assert_eq!(Protocol::Http.default_port(false), 80);
        assert_eq!(Protocol::Http.default_port(true), 443);
        assert_eq!(Protocol::Smtp.default_port(false), 25);
        assert_eq!(Protocol::Smtp.default_port(true), 465);
    }

    #[test]
    fn test_flags() {
        let mut flags = ProtocolOptions::DISABLE_IPV6 | ProtocolOptions::NO_EXPECT;
        assert!(flags.contains(ProtocolOptions::DISABLE_IPV6));
        assert!(!flags.contains(ProtocolOptions::KEEPALIVE));
        flags.remove(ProtocolOptions::DISABLE_IPV6);
        assert!(!flags.contains(ProtocolOptions::DISABLE_IPV6));
        flags.insert(ProtocolOptions::KEEPALIVE);
        assert_eq!(
            flags.bits(),
            (ProtocolOptions::NO_EXPECT | ProtocolOptions::KEEPALIVE).bits()
        );
    }

    #[test]
    fn test_builder() {
        let options = ConnectOptions::builder(Protocol::Smtp)
            .tls(true)
            .transfer_timeout(Duration::from_secs(10))
            .keepalive(Duration::from_secs(60))
            .build();

        assert_eq!(options.protocol, Protocol::Smtp);
        assert!(options.tls);
        assert!(options.has(ProtocolOptions::KEEPALIVE));
        assert_eq!(options.keepalive_interval, Some(Duration::from_secs(60)));
        assert_eq!(options.transfer_timeout, Duration::from_secs(10));
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
