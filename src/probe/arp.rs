//! ARP probing on the local broadcast segment.
//!
//! Only meaningful for targets on the same physical segment; ARP does not
//! route.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::resolver::{Resolve, SystemResolver};
use crate::result::ProbeResult;
use crate::transport::{ProbePacket, RawTransport, Transport, TransportError};

use super::ProbeError;

pub const DEFAULT_ARP_TIMEOUT: Duration = Duration::from_secs(1);

/// Broadcast one ARP request for the target and wait for any matching reply.
pub fn arp_ping_with(
    transport: &dyn Transport,
    resolver: &dyn Resolve,
    host: &str,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let target = match resolve_v4(resolver, host) {
        Ok(target) => target,
        Err(msg) => {
            let mut result = ProbeResult::pending(host, None);
            result.error = Some(msg);
            return Ok(result);
        }
    };

    let mut result = ProbeResult::pending(host, Some(target.to_string()));
    result.error = Some("No response".to_string());

    let packet = ProbePacket::ArpRequest {
        target,
        interface: None,
    };

    match transport.exchange(&packet, timeout) {
        Err(TransportError::PermissionDenied(msg)) => {
            return Err(ProbeError::PermissionDenied(msg))
        }
        Err(e) => result.error = Some(e.to_string()),
        Ok(exchange) => {
            let rtt = exchange.rtt_ms();
            if let Some(reply) = exchange.reply {
                result.packets_received = 1;
                result.packet_loss_percent = 0.0;
                result.alive = true;
                result.error = None;
                if let Some(ms) = rtt {
                    result.record_rtt(ms);
                }
                result.raw = reply.summary;
            }
        }
    }

    Ok(result)
}

/// ARP targets must end up as IPv4 addresses on the local segment.
fn resolve_v4(resolver: &dyn Resolve, host: &str) -> Result<Ipv4Addr, String> {
    match resolver.resolve(host) {
        Some(resolved) => match resolved.ip {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => Err("ARP requires an IPv4 target".to_string()),
        },
        None => Err("resolution failed".to_string()),
    }
}

/// ARP probe against the real link-layer transport and system resolver.
pub async fn arp_ping(host: &str, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || {
        arp_ping_with(&RawTransport, &SystemResolver, &host, timeout)
    })
    .await
    .map_err(|e| ProbeError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fake::{FailingResolver, StaticResolver};
    use crate::transport::fake::FakeTransport;
    use crate::transport::Layer;

    fn resolver() -> StaticResolver {
        StaticResolver(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    }

    #[test]
    fn any_reply_is_alive() {
        let transport = FakeTransport::always_replying(vec![Layer::Arp {
            sender_mac: [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
        }]);
        let res = arp_ping_with(&transport, &resolver(), "192.168.1.20", DEFAULT_ARP_TIMEOUT)
            .unwrap();
        assert!(res.alive);
        assert!(res.error.is_none());
        assert!(res.rtt_ms.is_some());
    }

    #[test]
    fn silence_is_no_response() {
        let transport = FakeTransport::always_timing_out();
        let res = arp_ping_with(&transport, &resolver(), "192.168.1.20", DEFAULT_ARP_TIMEOUT)
            .unwrap();
        assert!(!res.alive);
        assert_eq!(res.error.as_deref(), Some("No response"));
    }

    #[test]
    fn ipv6_targets_are_rejected() {
        let transport = FakeTransport::always_timing_out();
        let v6 = StaticResolver("2001:db8::1".parse().unwrap());
        let res = arp_ping_with(&transport, &v6, "h", DEFAULT_ARP_TIMEOUT).unwrap();
        assert!(!res.alive);
        assert_eq!(res.error.as_deref(), Some("ARP requires an IPv4 target"));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn unresolvable_target_fails_soft() {
        let transport = FakeTransport::always_timing_out();
        let res = arp_ping_with(&transport, &FailingResolver, "h", DEFAULT_ARP_TIMEOUT).unwrap();
        assert_eq!(res.error.as_deref(), Some("resolution failed"));
    }
}
