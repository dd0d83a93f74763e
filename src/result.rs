//! Result value objects shared by every probe strategy.
//!
//! Every probe produces a fresh [`ProbeResult`]; batch scans wrap them in a
//! [`ScanSummary`]. Results are never mutated after being returned.

use serde::Serialize;

/// Round to 2 decimal places (percentages).
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 3 decimal places (millisecond latencies).
pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Outcome of a single probe or a per-host multi-echo aggregate.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeResult {
    /// The hostname/IP exactly as the caller supplied it.
    pub host: String,
    /// Concrete IP used for transport, absent when resolution failed.
    pub resolved_ip: Option<String>,
    pub alive: bool,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: f64,
    pub min_response_time: Option<f64>,
    pub avg_response_time: Option<f64>,
    pub max_response_time: Option<f64>,
    /// Round-trip time of a single probe, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
    /// Destination port, for TCP/UDP probes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Numeric ICMP type observed in the reply, for ICMP probes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<u8>,
    /// Diagnostic cause, present exactly when `alive` is false and known.
    pub error: Option<String>,
    /// One entry per failed attempt of a multi-echo run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Strategy-specific diagnostic payload; advisory only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl ProbeResult {
    /// A not-yet-answered result: one packet out, nothing back.
    pub fn pending(host: &str, resolved_ip: Option<String>) -> Self {
        Self {
            host: host.to_string(),
            resolved_ip,
            alive: false,
            packets_sent: 1,
            packets_received: 0,
            packet_loss_percent: 100.0,
            min_response_time: None,
            avg_response_time: None,
            max_response_time: None,
            rtt_ms: None,
            port: None,
            icmp_type: None,
            error: None,
            errors: Vec::new(),
            raw: String::new(),
        }
    }

    /// Record a successfully timed round trip on a single-probe result.
    pub(crate) fn record_rtt(&mut self, rtt_ms: f64) {
        let rtt_ms = round3(rtt_ms);
        self.rtt_ms = Some(rtt_ms);
        self.min_response_time = Some(rtt_ms);
        self.avg_response_time = Some(rtt_ms);
        self.max_response_time = Some(rtt_ms);
    }
}

/// Loss percentage over `sent` probes, 2 decimals, 100.0 when none were sent.
pub fn packet_loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 100.0;
    }
    round2(100.0 * f64::from(sent - received) / f64::from(sent))
}

/// Aggregate counters for a whole scan.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub alive_count: usize,
    pub total_count: usize,
    /// Percentage of hosts alive, 2 decimals, 0.0 for an empty scan.
    pub success_rate: f64,
}

/// Result of a multi-host scan: one entry per input host, in input order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanSummary {
    pub results: Vec<ProbeResult>,
    pub summary: Summary,
}

impl ScanSummary {
    pub fn from_results(results: Vec<ProbeResult>) -> Self {
        let total_count = results.len();
        let alive_count = results.iter().filter(|r| r.alive).count();
        let success_rate = if total_count == 0 {
            0.0
        } else {
            round2(100.0 * alive_count as f64 / total_count as f64)
        };
        Self {
            results,
            summary: Summary {
                alive_count,
                total_count,
                success_rate,
            },
        }
    }
}

/// Outcome of a reverse-DNS lookup.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RdnsResult {
    pub ip: String,
    pub domain: Option<String>,
    pub error: Option<String>,
}
