//! UDP probing against a high, typically-closed port.
//!
//! The positive signal is inverted: an ICMP port-unreachable proves the host
//! is up with nothing listening. Silence is ambiguous by nature (open and
//! quiet, or filtered) and stays classified as "No response".

use std::time::Duration;

use crate::resolver::{Resolve, SystemResolver};
use crate::result::ProbeResult;
use crate::transport::{Layer, LayerKind, ProbePacket, RawTransport, Transport, TransportError};

use super::ProbeError;

pub const DEFAULT_UDP_PORT: u16 = 53000;
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(1);

/// Send one empty datagram and classify the single reply.
pub fn udp_ping_with(
    transport: &dyn Transport,
    resolver: &dyn Resolve,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let resolved = resolver.resolve(host);
    let mut result = ProbeResult::pending(host, resolved.map(|r| r.ip.to_string()));
    result.port = Some(port);
    result.error = Some("No response".to_string());

    let Some(resolved) = resolved else {
        result.error = Some("resolution failed".to_string());
        return Ok(result);
    };

    let packet = ProbePacket::UdpDatagram {
        dst: resolved.ip,
        port,
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
                if let Some(ms) = rtt {
                    result.record_rtt(ms);
                }
                let port_unreachable = matches!(
                    reply.layer(LayerKind::Icmp),
                    Some(Layer::Icmp {
                        icmp_type: 3,
                        code: 3,
                    })
                );
                if port_unreachable {
                    result.alive = true;
                    result.error = None;
                } else {
                    result.error = Some("Unexpected response or ICMP error".to_string());
                }
                result.raw = reply.summary;
            }
        }
    }

    Ok(result)
}

/// UDP probe against the real raw transport and system resolver.
pub async fn udp_ping(host: &str, port: u16, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || {
        udp_ping_with(&RawTransport, &SystemResolver, &host, port, timeout)
    })
    .await
    .map_err(|e| ProbeError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fake::StaticResolver;
    use crate::transport::fake::FakeTransport;
    use std::net::{IpAddr, Ipv4Addr};

    fn resolver() -> StaticResolver {
        StaticResolver(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)))
    }

    fn probe(transport: &FakeTransport) -> ProbeResult {
        udp_ping_with(transport, &resolver(), "h", 53000, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn port_unreachable_is_the_positive_signal() {
        let transport = FakeTransport::always_replying(vec![
            Layer::Ipv4 { protocol: 1 },
            Layer::Icmp {
                icmp_type: 3,
                code: 3,
            },
        ]);
        let res = probe(&transport);
        assert!(res.alive);
        assert!(res.error.is_none());
        assert_eq!(res.port, Some(53000));
    }

    #[test]
    fn other_icmp_errors_are_unexpected() {
        let transport = FakeTransport::always_replying(vec![
            Layer::Ipv4 { protocol: 1 },
            Layer::Icmp {
                icmp_type: 3,
                code: 1,
            },
        ]);
        let res = probe(&transport);
        assert!(!res.alive);
        assert_eq!(
            res.error.as_deref(),
            Some("Unexpected response or ICMP error")
        );
    }

    #[test]
    fn a_real_datagram_reply_is_unexpected_too() {
        let transport = FakeTransport::always_replying(vec![Layer::Udp { src_port: 53000 }]);
        let res = probe(&transport);
        assert!(!res.alive);
        assert_eq!(
            res.error.as_deref(),
            Some("Unexpected response or ICMP error")
        );
    }

    #[test]
    fn silence_is_no_response() {
        let transport = FakeTransport::always_timing_out();
        let res = probe(&transport);
        assert!(!res.alive);
        assert_eq!(res.error.as_deref(), Some("No response"));
    }
}
