//! TCP transport: candidate dialing, socket options and the plain/TLS
//! stream wrapper.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, TcpKeepalive, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;

use crate::config::{ConnectOptions, ProtocolOptions};
use crate::resolve::{self, IpCache};
use crate::{Error, Result};

/// A stream that can be either plaintext or TLS.
pub enum NetStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl NetStream {
    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns the underlying TCP stream.
    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => stream.get_ref().0,
        }
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(stream) => f.debug_tuple("Plain").field(stream).finish(),
            Self::Tls(stream) => f.debug_tuple("Tls").field(stream.get_ref().0).finish(),
        }
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens a TCP connection to `host:port` (or the configured proxy).
///
/// Candidates are tried in resolver order. When resolution fails, or every
/// candidate fails, addresses from the IP cache are tried as a last resort.
/// The address that worked is recorded back into the cache.
pub(crate) async fn connect_tcp(
    host: &str,
    port: u16,
    options: &ConnectOptions,
) -> Result<(TcpStream, SocketAddr)> {
    let (dial_host, dial_port) = options
        .proxy
        .as_ref()
        .map_or((host, port), |(h, p)| (h.as_str(), *p));
    let disable_ipv6 = options.has(ProtocolOptions::DISABLE_IPV6);
    let cache = options.ip_cache.as_deref();

    let candidates = match resolve::resolve(dial_host, dial_port, disable_ipv6).await {
        Ok(candidates) => candidates,
        Err(err) => {
            let cached = cached_candidates(cache, dial_host, dial_port, disable_ipv6, &[]);
            if cached.is_empty() {
                tracing::error!(host = dial_host, error = %err, "name resolution failed");
                return Err(err);
            }
            tracing::warn!(host = dial_host, error = %err, "name resolution failed, using cached addresses");
            cached
        }
    };

    let mut last_error = None;
    for addr in &candidates {
        match connect_addr(dial_host, *addr, options).await {
            Ok(stream) => {
                if let Some(cache) = cache {
                    cache.record(dial_host, addr.ip());
                }
                return Ok((stream, *addr));
            }
            Err(err) => {
                if matches!(err, Error::Permanent(_)) {
                    return Err(err);
                }
                tracing::debug!(host = dial_host, %addr, error = %err, "connect attempt failed");
                last_error = Some(err);
            }
        }
    }

    for addr in cached_candidates(cache, dial_host, dial_port, disable_ipv6, &candidates) {
        match connect_addr(dial_host, addr, options).await {
            Ok(stream) => {
                tracing::info!(host = dial_host, %addr, "connected using cached address");
                return Ok((stream, addr));
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Resolve {
        host: dial_host.to_string(),
        message: "no address to connect to".to_string(),
    }))
}

fn cached_candidates(
    cache: Option<&IpCache>,
    host: &str,
    port: u16,
    disable_ipv6: bool,
    already_tried: &[SocketAddr],
) -> Vec<SocketAddr> {
    let Some(ips) = cache.and_then(|c| c.lookup(host)) else {
        return Vec::new();
    };
    let addrs = ips.into_iter().map(|ip| SocketAddr::new(ip, port));
    resolve::order_candidates(addrs, disable_ipv6)
        .into_iter()
        .filter(|addr| !already_tried.contains(addr))
        .collect()
}

/// Connects one candidate with the connect timeout, socket options set first.
async fn connect_addr(host: &str, addr: SocketAddr, options: &ConnectOptions) -> Result<TcpStream> {
    let socket = configure_socket(addr, options)?;
    let timeout = options.connect_timeout;
    match tokio::time::timeout(timeout, socket.connect(addr)).await {
        Err(_) => {
            tracing::warn!(host, %addr, ?timeout, "connect timed out");
            Err(Error::Timeout(timeout))
        }
        Ok(Err(err)) => Err(connect_error(err, host, addr.port(), timeout)),
        Ok(Ok(stream)) => Ok(stream),
    }
}

fn connect_error(err: io::Error, host: &str, port: u16, timeout: Duration) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Error::Refused {
            host: host.to_string(),
            port,
        },
        io::ErrorKind::TimedOut => Error::Timeout(timeout),
        _ => Error::Io(err),
    }
}

/// Creates a non-blocking socket for `addr` with buffer sizes and keepalive
/// applied.
fn configure_socket(addr: SocketAddr, options: &ConnectOptions) -> Result<TcpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))?;

    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if options.has(ProtocolOptions::KEEPALIVE) {
        socket.set_keepalive(true)?;
        if let Some(interval) = options.keepalive_interval {
            let keepalive = TcpKeepalive::new().with_time(interval);
            if let Err(err) = socket.set_tcp_keepalive(&keepalive) {
                tracing::warn!(error = %err, "keepalive interval not supported");
            }
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| Error::Permanent(format!("failed to set socket non-blocking: {e}")))?;

    let std_stream: std::net::TcpStream = socket.into();
    Ok(TcpSocket::from_std_stream(std_stream))
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
    use crate::config::Protocol;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let options = ConnectOptions::builder(Protocol::Http)
            .buffer_sizes(Some(64 * 1024), Some(64 * 1024))
            .keepalive(Duration::from_secs(30))
            .build();

        let (stream, peer) = connect_tcp("127.0.0.1", port, &options).await.unwrap();
        assert_eq!(peer.port(), port);
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = ConnectOptions::new(Protocol::Http);
        let err = connect_tcp("127.0.0.1", port, &options).await.unwrap_err();
        assert!(matches!(err, Error::Refused { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_success_recorded_in_cache() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cache = Arc::new(IpCache::new());
        let options = ConnectOptions::builder(Protocol::Smtp)
            .ip_cache(Arc::clone(&cache))
            .build();

        connect_tcp("127.0.0.1", port, &options).await.unwrap();
        assert_eq!(
            cache.lookup("127.0.0.1").unwrap(),
            vec!["127.0.0.1".parse::<std::net::IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_cached_candidates_skip_tried() {
        let cache = IpCache::new();
        cache.record("h", "10.0.0.1".parse().unwrap());
        cache.record("h", "10.0.0.2".parse().unwrap());
        let tried: Vec<SocketAddr> = vec!["10.0.0.2:25".parse().unwrap()];
        let left = cached_candidates(Some(&cache), "h", 25, false, &tried);
        assert_eq!(left, vec!["10.0.0.1:25".parse::<SocketAddr>().unwrap()]);
    }
}
