//! Name resolution and the optional process-wide IP cache.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{PoisonError, RwLock};

use crate::{Error, Result};

/// Hostname → address cache shared between connections.
///
/// Owned by the caller; the core only consults it when every resolved
/// candidate failed and records addresses that worked.
#[derive(Debug, Default)]
pub struct IpCache {
    entries: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl IpCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached addresses for `host`.
    #[must_use]
    pub fn lookup(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(host).cloned()
    }

    /// Records `addr` as working for `host`, moving it to the front.
    pub fn record(&self, host: &str, addr: IpAddr) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let list = entries.entry(host.to_string()).or_default();
        list.retain(|a| *a != addr);
        list.insert(0, addr);
    }

    /// Drops everything known about `host`.
    pub fn forget(&self, host: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(host);
    }

    /// Returns the number of cached hostnames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves `host` into an ordered list of connect candidates.
///
/// IPv6 addresses come first unless `disable_ipv6` is set, in which case
/// they are dropped entirely.
///
/// # Errors
///
/// Returns [`Error::Resolve`] if the resolver fails or yields no usable
/// address.
pub async fn resolve(host: &str, port: u16, disable_ipv6: bool) -> Result<Vec<SocketAddr>> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Resolve {
            host: host.to_string(),
            message: e.to_string(),
        })?;

    let candidates = order_candidates(addrs, disable_ipv6);
    if candidates.is_empty() {
        return Err(Error::Resolve {
            host: host.to_string(),
            message: if disable_ipv6 {
                "no IPv4 address".to_string()
            } else {
                "no address".to_string()
            },
        });
    }
    Ok(candidates)
}

/// Orders resolver output: IPv6 first (stable), IPv4 after, duplicates removed.
pub(crate) fn order_candidates(
    addrs: impl IntoIterator<Item = SocketAddr>,
    disable_ipv6: bool,
) -> Vec<SocketAddr> {
    let mut v6 = Vec::new();
    let mut v4 = Vec::new();
    for addr in addrs {
        let bucket = if addr.is_ipv6() { &mut v6 } else { &mut v4 };
        if !bucket.contains(&addr) {
            bucket.push(addr);
        }
    }
    if disable_ipv6 {
        return v4;
    }
    v6.extend(v4);
    v6
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
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 80)
    }

    fn v6(last: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, last)), 80)
    }

    #[test]
    fn test_ipv6_preferred() {
        let ordered = order_candidates(vec![v4(1), v6(1), v4(2), v6(2)], false);
        assert_eq!(ordered, vec![v6(1), v6(2), v4(1), v4(2)]);
    }

    #[test]
    fn test_disable_ipv6() {
        let ordered = order_candidates(vec![v6(1), v4(1), v4(1)], true);
        assert_eq!(ordered, vec![v4(1)]);
    }

    #[test]
    fn test_cache_record_moves_to_front() {
        let cache = IpCache::new();
        assert!(cache.is_empty());
        cache.record("example.com", v4(1).ip());
        cache.record("example.com", v4(2).ip());
        cache.record("example.com", v4(1).ip());
        assert_eq!(
            cache.lookup("example.com").unwrap(),
            vec![v4(1).ip(), v4(2).ip()]
        );
        cache.forget("example.com");
        assert!(cache.lookup("example.com").is_none());
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addrs = resolve("127.0.0.1", 8080, true).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse().unwrap()]);
    }
}
