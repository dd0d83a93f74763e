//! ICMP echo probing: single echo, multi-echo aggregation, batch scans.
//!
//! Classification note: any ICMP reply counts as "alive", including
//! time-exceeded and destination-unreachable. That overstates reachability
//! for intermediate-hop responses, but callers depend on the behavior, so it
//! is kept and the observed ICMP type is recorded alongside the verdict.

use std::time::Duration;

use crate::resolver::{Resolve, SystemResolver};
use crate::result::{packet_loss_percent, round3, ProbeResult, ScanSummary};
use crate::transport::{Layer, LayerKind, ProbePacket, RawTransport, Transport, TransportError};

use super::{EchoOptions, ProbeError, SweepOptions};

/// Echo identifier: process identity mixed with randomness, so concurrent
/// processes pinging the same target stay distinguishable.
fn echo_ident() -> u16 {
    (std::process::id() & 0xFFFF) as u16 ^ rand::random::<u16>()
}

/// Send one echo request and classify the single reply.
pub fn ping_once_with(
    transport: &dyn Transport,
    resolver: &dyn Resolve,
    host: &str,
    opts: &EchoOptions,
) -> Result<ProbeResult, ProbeError> {
    let resolved = resolver.resolve(host);
    let mut result = ProbeResult::pending(host, resolved.map(|r| r.ip.to_string()));

    let Some(resolved) = resolved else {
        result.error = Some("resolution failed".to_string());
        return Ok(result);
    };

    let packet = ProbePacket::IcmpEcho {
        dst: resolved.ip,
        ident: echo_ident(),
        seq: rand::random(),
        ttl: opts.ttl,
        dont_fragment: opts.dont_fragment,
        payload: opts.payload.clone(),
        interface: opts.interface.clone(),
    };

    match transport.exchange(&packet, opts.timeout) {
        Err(TransportError::PermissionDenied(msg)) => {
            return Err(ProbeError::PermissionDenied(msg))
        }
        Err(e) => result.error = Some(e.to_string()),
        Ok(exchange) => {
            let rtt = exchange.rtt_ms();
            match exchange.reply {
                None => result.error = Some("timeout/no reply".to_string()),
                Some(reply) => {
                    result.icmp_type = match reply
                        .layer(LayerKind::Icmp)
                        .or_else(|| reply.layer(LayerKind::Icmpv6))
                    {
                        Some(Layer::Icmp { icmp_type, .. })
                        | Some(Layer::Icmpv6 { icmp_type, .. }) => Some(*icmp_type),
                        _ => None,
                    };
                    result.packets_received = 1;
                    result.packet_loss_percent = 0.0;
                    result.alive = true;
                    if let Some(ms) = rtt {
                        result.record_rtt(ms);
                    }
                    result.raw = reply.summary;
                }
            }
        }
    }

    Ok(result)
}

/// Multi-echo with aggregate statistics.
///
/// Echoes are strictly sequential: a reply or timeout for echo N resolves
/// before echo N+1 is sent, with `interval` sleeps in between.
pub fn ping_icmp_with(
    transport: &dyn Transport,
    resolver: &dyn Resolve,
    host: &str,
    opts: &SweepOptions,
) -> Result<ProbeResult, ProbeError> {
    let resolved_ip = resolver.resolve(host).map(|r| r.ip.to_string());

    let mut rtts: Vec<f64> = Vec::new();
    let mut received = 0u32;
    let mut errors: Vec<String> = Vec::new();

    for attempt in 0..opts.count {
        let res = ping_once_with(transport, resolver, host, &opts.echo)?;
        if res.packets_received > 0 {
            received += 1;
            if let Some(rtt) = res.rtt_ms {
                rtts.push(rtt);
            }
        }
        if let Some(err) = res.error {
            errors.push(err);
        }
        if attempt + 1 != opts.count {
            std::thread::sleep(opts.interval);
        }
    }

    let mut out = ProbeResult::pending(host, resolved_ip);
    out.packets_sent = opts.count;
    out.packets_received = received;
    out.packet_loss_percent = packet_loss_percent(opts.count, received);
    out.alive = received > 0;
    out.errors = errors;
    if !rtts.is_empty() {
        out.min_response_time = Some(rtts.iter().copied().fold(f64::INFINITY, f64::min));
        out.max_response_time = Some(rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        out.avg_response_time = Some(round3(rtts.iter().sum::<f64>() / rtts.len() as f64));
    }
    Ok(out)
}

/// Scan many hosts sequentially, in input order, one multi-echo run each.
pub fn ping_many_with(
    transport: &dyn Transport,
    resolver: &dyn Resolve,
    hosts: &[String],
    opts: &SweepOptions,
) -> Result<ScanSummary, ProbeError> {
    let total = hosts.len();
    tracing::info!(hosts = total, count = opts.count, "starting ICMP scan");

    let mut results = Vec::with_capacity(total);
    for (idx, host) in hosts.iter().enumerate() {
        tracing::debug!("[{}/{}] pinging {}", idx + 1, total, host);
        results.push(ping_icmp_with(transport, resolver, host, opts)?);
    }

    let summary = ScanSummary::from_results(results);
    tracing::info!(
        alive = summary.summary.alive_count,
        total = summary.summary.total_count,
        "ICMP scan complete"
    );
    Ok(summary)
}

/// Multi-echo against the real raw transport and system resolver.
pub async fn ping_icmp(host: &str, opts: SweepOptions) -> Result<ProbeResult, ProbeError> {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || {
        ping_icmp_with(&RawTransport, &SystemResolver, &host, &opts)
    })
    .await
    .map_err(|e| ProbeError::Task(e.to_string()))?
}

/// Batch scan against the real raw transport and system resolver.
pub async fn ping_many_icmp(
    hosts: Vec<String>,
    opts: SweepOptions,
) -> Result<ScanSummary, ProbeError> {
    tokio::task::spawn_blocking(move || {
        ping_many_with(&RawTransport, &SystemResolver, &hosts, &opts)
    })
    .await
    .map_err(|e| ProbeError::Task(e.to_string()))?
}

/// Longest wait a caller can request for a single exchange.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Timeout from caller-supplied fractional seconds.
///
/// The input arrives straight from query parameters, so every float must map
/// to a valid `Duration`: negatives and NaN clamp to zero, oversized and
/// infinite values clamp to [`MAX_PROBE_TIMEOUT`].
pub fn timeout_from_secs(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => d.min(MAX_PROBE_TIMEOUT),
        Err(_) if secs > 0.0 => MAX_PROBE_TIMEOUT,
        Err(_) => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fake::{FailingResolver, StaticResolver};
    use crate::transport::fake::{FakeTransport, Scripted};
    use crate::transport::Layer;
    use std::net::{IpAddr, Ipv4Addr};

    fn resolver() -> StaticResolver {
        StaticResolver(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
    }

    fn quick_sweep(count: u32) -> SweepOptions {
        SweepOptions {
            count,
            interval: Duration::from_millis(0),
            echo: EchoOptions::default(),
        }
    }

    #[test]
    fn echo_reply_is_alive() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 0,
            code: 0,
        }]);
        let res = ping_once_with(&transport, &resolver(), "example.net", &EchoOptions::default())
            .unwrap();
        assert!(res.alive);
        assert_eq!(res.icmp_type, Some(0));
        assert_eq!(res.packets_received, 1);
        assert_eq!(res.packet_loss_percent, 0.0);
        assert!(res.error.is_none());
        assert!(res.rtt_ms.is_some());
        assert_eq!(res.resolved_ip.as_deref(), Some("192.0.2.1"));
    }

    #[test]
    fn time_exceeded_still_counts_as_alive() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 11,
            code: 0,
        }]);
        let res = ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
        assert!(res.alive);
        assert_eq!(res.icmp_type, Some(11));
    }

    #[test]
    fn timeout_sets_no_reply_error() {
        let transport = FakeTransport::always_timing_out();
        let res = ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
        assert!(!res.alive);
        assert_eq!(res.error.as_deref(), Some("timeout/no reply"));
        assert_eq!(res.packet_loss_percent, 100.0);
        assert!(res.min_response_time.is_none());
    }

    #[test]
    fn alive_and_error_are_mutually_exclusive() {
        for script in [
            vec![Scripted::Reply(vec![Layer::Icmp {
                icmp_type: 0,
                code: 0,
            }])],
            vec![Scripted::Timeout],
        ] {
            let transport = FakeTransport::new(script);
            let res =
                ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
            assert_eq!(res.alive, res.error.is_none());
        }
    }

    #[test]
    fn classification_is_deterministic_for_a_fixed_transport() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 0,
            code: 0,
        }]);
        let first =
            ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
        let second =
            ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
        assert_eq!(first.alive, second.alive);
        assert_eq!(first.error, second.error);
    }

    #[test]
    fn permission_denied_escapes_the_probe() {
        let transport = FakeTransport::new(vec![Scripted::Permission]);
        let err = ping_once_with(&transport, &resolver(), "h", &EchoOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProbeError::PermissionDenied(_)));
    }

    #[test]
    fn unresolvable_host_fails_soft() {
        let transport = FakeTransport::always_replying(vec![]);
        let res =
            ping_once_with(&transport, &FailingResolver, "nope", &EchoOptions::default()).unwrap();
        assert!(!res.alive);
        assert_eq!(res.error.as_deref(), Some("resolution failed"));
        assert!(res.resolved_ip.is_none());
        assert_eq!(res.packet_loss_percent, 100.0);
        // Nothing was handed to the transport.
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn multi_echo_aggregates_loss_and_errors() {
        let echo = || {
            Scripted::Reply(vec![Layer::Icmp {
                icmp_type: 0,
                code: 0,
            }])
        };
        let transport =
            FakeTransport::new(vec![echo(), Scripted::Timeout, echo(), Scripted::Timeout]);
        let res = ping_icmp_with(&transport, &resolver(), "h", &quick_sweep(4)).unwrap();
        assert!(res.alive);
        assert_eq!(res.packets_sent, 4);
        assert_eq!(res.packets_received, 2);
        assert_eq!(res.packet_loss_percent, 50.0);
        assert_eq!(res.errors, vec!["timeout/no reply", "timeout/no reply"]);
        assert!(res.min_response_time.is_some());
        assert!(res.avg_response_time.is_some());
    }

    #[test]
    fn multi_echo_with_no_replies_has_no_latency() {
        let transport = FakeTransport::always_timing_out();
        let res = ping_icmp_with(&transport, &resolver(), "h", &quick_sweep(3)).unwrap();
        assert!(!res.alive);
        assert_eq!(res.packet_loss_percent, 100.0);
        assert!(res.min_response_time.is_none());
        assert!(res.avg_response_time.is_none());
        assert!(res.max_response_time.is_none());
        assert_eq!(res.errors.len(), 3);
    }

    #[test]
    fn full_reception_is_exactly_zero_loss() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 0,
            code: 0,
        }]);
        let res = ping_icmp_with(&transport, &resolver(), "h", &quick_sweep(4)).unwrap();
        assert_eq!(res.packet_loss_percent, 0.0);
        assert_eq!(res.packets_received, 4);
    }

    #[test]
    fn batch_preserves_input_order_and_counts() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 0,
            code: 0,
        }]);
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scan = ping_many_with(&transport, &resolver(), &hosts, &quick_sweep(1)).unwrap();
        assert_eq!(scan.summary.total_count, 3);
        assert_eq!(scan.summary.alive_count, 3);
        assert_eq!(scan.summary.success_rate, 100.0);
        let order: Vec<_> = scan.results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn batch_of_nothing_is_an_empty_summary() {
        let transport = FakeTransport::always_timing_out();
        let scan = ping_many_with(&transport, &resolver(), &[], &quick_sweep(1)).unwrap();
        assert_eq!(scan.summary.total_count, 0);
        assert_eq!(scan.summary.success_rate, 0.0);
        assert!(scan.results.is_empty());
    }

    #[test]
    fn reply_rtt_comes_from_the_exchange_clock() {
        let transport = FakeTransport::always_replying(vec![Layer::Icmp {
            icmp_type: 0,
            code: 0,
        }]);
        let res = ping_once_with(&transport, &resolver(), "h", &EchoOptions::default()).unwrap();
        // The fake answers after 1500 microseconds.
        assert_eq!(res.rtt_ms, Some(1.5));
        assert_eq!(res.min_response_time, Some(1.5));
        assert!(!res.raw.is_empty());
    }

    #[test]
    fn timeout_from_secs_is_total_over_floats() {
        assert_eq!(timeout_from_secs(0.5), Duration::from_millis(500));
        assert_eq!(timeout_from_secs(-3.0), Duration::ZERO);
        assert_eq!(timeout_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(timeout_from_secs(1e300), MAX_PROBE_TIMEOUT);
        assert_eq!(timeout_from_secs(f64::INFINITY), MAX_PROBE_TIMEOUT);
    }

    #[test]
    fn ident_mixes_pid_and_randomness() {
        // Two consecutive idents should essentially never collide.
        let a = echo_ident();
        let b = echo_ident();
        let c = echo_ident();
        assert!(a != b || b != c);
    }
}
