//! Hostname resolution with a deterministic IPv4 preference.
//!
//! Resolution is behind a trait so probes can be exercised against a fake
//! resolver without touching the network.

use std::net::{IpAddr, ToSocketAddrs};

/// Address family of a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A concrete address chosen for a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub ip: IpAddr,
    pub family: Family,
}

impl Resolved {
    pub fn new(ip: IpAddr) -> Self {
        let family = match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        };
        Self { ip, family }
    }
}

/// Name resolution strategy.
///
/// Returns `None` on lookup failure; callers treat that as "resolution
/// failed" and continue best-effort rather than short-circuiting.
pub trait Resolve: Send + Sync {
    fn resolve(&self, host: &str) -> Option<Resolved>;
}

/// System resolver backed by `getaddrinfo`.
///
/// Literal addresses are detected by syntax and never looked up. When a name
/// has both A and AAAA records the first IPv4 entry wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str) -> Option<Resolved> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(Resolved::new(ip));
        }

        let addrs: Vec<IpAddr> = (host, 0)
            .to_socket_addrs()
            .ok()?
            .map(|sa| sa.ip())
            .collect();

        select_address(&addrs)
    }
}

/// First IPv4 entry wins; an all-IPv6 answer falls back to its first entry.
fn select_address(addrs: &[IpAddr]) -> Option<Resolved> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .map(Resolved::new)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Resolver that always returns the same address.
    pub(crate) struct StaticResolver(pub IpAddr);

    impl Resolve for StaticResolver {
        fn resolve(&self, _host: &str) -> Option<Resolved> {
            Some(Resolved::new(self.0))
        }
    }

    /// Resolver for which every lookup fails.
    pub(crate) struct FailingResolver;

    impl Resolve for FailingResolver {
        fn resolve(&self, _host: &str) -> Option<Resolved> {
            None
        }
    }
}
