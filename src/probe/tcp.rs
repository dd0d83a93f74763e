//! TCP SYN probing.
//!
//! A host counts as up when the probed port answers with SYN+ACK (open) or
//! RST (closed); either way something routed and replied. No handshake is
//! completed.

use std::time::Duration;

use crate::resolver::{Resolve, SystemResolver};
use crate::result::ProbeResult;
use crate::transport::{Layer, LayerKind, ProbePacket, RawTransport, Transport, TransportError};

use super::ProbeError;

pub const DEFAULT_TCP_PORT: u16 = 80;
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(5);

const SYN_ACK: u8 = 0x12;
const RST: u8 = 0x04;

/// Send a single SYN segment and classify the single reply.
pub fn tcp_ping_with(
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

    let packet = ProbePacket::TcpSyn {
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
                if let Some(Layer::Tcp { flags }) = reply.layer(LayerKind::Tcp) {
                    if *flags == SYN_ACK || *flags == RST {
                        result.alive = true;
                        result.error = None;
                    } else {
                        result.error = Some("Unexpected TCP flags".to_string());
                    }
                } else if matches!(
                    reply.layer(LayerKind::Ipv4),
                    Some(Layer::Ipv4 { protocol: 1 })
                ) {
                    result.error = Some("Received ICMP error".to_string());
                }
                result.raw = reply.summary;
            }
        }
    }

    Ok(result)
}

/// SYN probe against the real raw transport and system resolver.
pub async fn tcp_ping(host: &str, port: u16, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || {
        tcp_ping_with(&RawTransport, &SystemResolver, &host, port, timeout)
    })
    .await
    .map_err(|e| ProbeError::Task(e.to_string()))?
}
