//! Reverse-DNS lookup.

use std::net::IpAddr;
use std::time::Duration;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

use crate::result::RdnsResult;

/// Look up the primary hostname for a literal IP address.
///
/// Failures never propagate; a not-found condition or any other lookup error
/// lands in the result's `error` field with `domain` absent.
pub async fn rdns_lookup(ip: &str) -> RdnsResult {
    let mut result = RdnsResult {
        ip: ip.to_string(),
        domain: None,
        error: None,
    };

    let addr: IpAddr = match ip.parse() {
        Ok(addr) => addr,
        Err(e) => {
            result.error = Some(format!("invalid IP address: {e}"));
            return result;
        }
    };

    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(2);
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

    match resolver.reverse_lookup(addr).await {
        Ok(response) => match response.iter().next() {
            Some(name) => {
                result.domain = Some(name.to_string().trim_end_matches('.').to_string());
            }
            None => result.error = Some(format!("host not found: {ip}")),
        },
        Err(e) => {
            result.error = Some(match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => format!("host not found: {ip}"),
                _ => e.to_string(),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_literal_is_an_error_not_a_lookup() {
        let res = rdns_lookup("not-an-ip").await;
        assert!(res.domain.is_none());
        assert!(res.error.as_deref().unwrap().starts_with("invalid IP address"));
    }

    #[tokio::test]
    async fn error_and_domain_are_mutually_exclusive() {
        // 192.0.2.0/24 is TEST-NET-1; a PTR record should not exist.
        let res = rdns_lookup("192.0.2.55").await;
        assert!(res.domain.is_some() != res.error.is_some());
    }
}
