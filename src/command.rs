//! Subprocess ping backend for environments without raw-socket privilege.
//!
//! Invokes the platform's native ping utility and parses its textual output
//! into the same [`ProbeResult`] shape the packet-level probes produce.
//! Parsing is best-effort per line: a line that fails to parse contributes
//! nothing, and a partially-parsed result (loss known, latency unknown) is
//! valid output.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use crate::result::{ProbeResult, ScanSummary};

/// Closed set of ping-output dialects, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    UnixLike,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::UnixLike
        }
    }

    fn ping_args(self, host: &str, count: u32, timeout_secs: u64) -> Vec<String> {
        match self {
            // Windows takes the per-packet timeout in milliseconds.
            Platform::Windows => vec![
                "-n".to_string(),
                count.to_string(),
                "-w".to_string(),
                (timeout_secs * 1000).to_string(),
                host.to_string(),
            ],
            Platform::UnixLike => vec![
                "-c".to_string(),
                count.to_string(),
                "-W".to_string(),
                timeout_secs.to_string(),
                host.to_string(),
            ],
        }
    }
}

/// Fields recovered from ping output; `None` means the line carrying the
/// field never parsed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedStats {
    pub packets_received: Option<u32>,
    pub packet_loss_percent: Option<f64>,
    pub min_response_time: Option<f64>,
    pub avg_response_time: Option<f64>,
    pub max_response_time: Option<f64>,
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Scan ping output line by line, keeping whatever parses.
pub fn parse_ping_output(platform: Platform, output: &str) -> ParsedStats {
    let mut stats = ParsedStats::default();
    for line in output.lines() {
        match platform {
            Platform::UnixLike => parse_unix_line(line, &mut stats),
            Platform::Windows => parse_windows_line(line, &mut stats),
        }
    }
    stats
}

fn parse_unix_line(line: &str, stats: &mut ParsedStats) {
    static RECEIVED: OnceLock<Regex> = OnceLock::new();
    static LOSS: OnceLock<Regex> = OnceLock::new();
    static RTT: OnceLock<Regex> = OnceLock::new();

    // "5 packets transmitted, 5 received, 0% packet loss" (Linux) or
    // "1 packets transmitted, 1 packets received, 0.0% packet loss" (BSD).
    let received = regex(&RECEIVED, r"(?i)(\d+)\s+(?:packets\s+)?received");
    if let Some(caps) = received.captures(line) {
        if let Ok(n) = caps[1].parse() {
            stats.packets_received = Some(n);
        }
    }

    let loss = regex(&LOSS, r"(?i)([\d.]+)%\s+packet\s+loss");
    if let Some(caps) = loss.captures(line) {
        if let Ok(pct) = caps[1].parse() {
            stats.packet_loss_percent = Some(pct);
        }
    }

    // "rtt min/avg/max/mdev = 10.1/20.4/30.7/0.1 ms" or the macOS
    // "round-trip min/avg/max/stddev = ..." spelling; jitter is ignored.
    let rtt = regex(&RTT, r"(?i)(?:rtt|round-trip)[^=]*=\s*([\d.]+)/([\d.]+)/([\d.]+)");
    if let Some(caps) = rtt.captures(line) {
        if let (Ok(min), Ok(avg), Ok(max)) =
            (caps[1].parse(), caps[2].parse(), caps[3].parse())
        {
            stats.min_response_time = Some(min);
            stats.avg_response_time = Some(avg);
            stats.max_response_time = Some(max);
        }
    }
}

fn parse_windows_line(line: &str, stats: &mut ParsedStats) {
    static RECEIVED: OnceLock<Regex> = OnceLock::new();
    static LOSS: OnceLock<Regex> = OnceLock::new();
    static MIN: OnceLock<Regex> = OnceLock::new();
    static MAX: OnceLock<Regex> = OnceLock::new();
    static AVG: OnceLock<Regex> = OnceLock::new();

    // "Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),"
    if let Some(caps) = regex(&RECEIVED, r"(?i)received\s*=\s*(\d+)").captures(line) {
        if let Ok(n) = caps[1].parse() {
            stats.packets_received = Some(n);
        }
    }
    if let Some(caps) = regex(&LOSS, r"(?i)\(([\d.]+)%\s+loss\)").captures(line) {
        if let Ok(pct) = caps[1].parse() {
            stats.packet_loss_percent = Some(pct);
        }
    }

    // "Minimum = 9ms, Maximum = 11ms, Average = 10ms"
    if let Some(caps) = regex(&MIN, r"(?i)minimum\s*=\s*([\d.]+)\s*ms").captures(line) {
        if let Ok(v) = caps[1].parse() {
            stats.min_response_time = Some(v);
        }
    }
    if let Some(caps) = regex(&MAX, r"(?i)maximum\s*=\s*([\d.]+)\s*ms").captures(line) {
        if let Ok(v) = caps[1].parse() {
            stats.max_response_time = Some(v);
        }
    }
    if let Some(caps) = regex(&AVG, r"(?i)average\s*=\s*([\d.]+)\s*ms").captures(line) {
        if let Ok(v) = caps[1].parse() {
            stats.avg_response_time = Some(v);
        }
    }
}

/// Resolve to an IPv4 address when one exists, otherwise the first address.
async fn resolve_for_display(host: &str) -> Option<String> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Some(ip.to_string());
    }
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{host}:0"))
        .await
        .ok()?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .map(|ip| ip.to_string())
}

/// Run the platform ping utility against one host.
pub async fn ping_host_cmd(host: &str, count: u32, timeout_secs: u64) -> ProbeResult {
    ping_host_cmd_on(Platform::current(), host, count, timeout_secs).await
}

pub async fn ping_host_cmd_on(
    platform: Platform,
    host: &str,
    count: u32,
    timeout_secs: u64,
) -> ProbeResult {
    let resolved_ip = resolve_for_display(host).await;
    let mut result = ProbeResult::pending(host, resolved_ip);
    result.packets_sent = count;

    let args = platform.ping_args(host, count, timeout_secs);
    tracing::debug!(?args, "running ping command");

    // Cap the whole process: per-packet timeouts can stack up.
    let overall = Duration::from_secs(timeout_secs * u64::from(count) + 10);
    let output = match tokio::time::timeout(overall, Command::new("ping").args(&args).output())
        .await
    {
        Err(_) => {
            result.error = Some(format!(
                "ping command timed out after {} seconds",
                overall.as_secs()
            ));
            return result;
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            result.error =
                Some("ping command not found - ensure ping is installed and in PATH".to_string());
            return result;
        }
        Ok(Err(e)) => {
            result.error = Some(format!("ping failed: {e}"));
            return result;
        }
        Ok(Ok(output)) => output,
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    result.raw = text.trim().to_string();

    let stats = parse_ping_output(platform, &text);
    if let Some(received) = stats.packets_received {
        result.packets_received = received.min(count);
    }
    if let Some(loss) = stats.packet_loss_percent {
        result.packet_loss_percent = loss;
    }
    result.min_response_time = stats.min_response_time;
    result.avg_response_time = stats.avg_response_time;
    result.max_response_time = stats.max_response_time;

    match output.status.code() {
        Some(0) => result.alive = true,
        Some(code) => result.error = Some(format!("ping returned code {code}")),
        None => result.error = Some("ping terminated by signal".to_string()),
    }

    result
}

/// Live-progress consumer for batch scans.
pub trait Progress: Send {
    /// Called once per alive host, in scan order, as each host completes.
    fn host_alive(&mut self, host: &str, resolved_ip: &str);
}

/// Writes `host<TAB>resolved_ip` lines to the wrapped stream.
pub struct TabSeparated<W: Write + Send>(pub W);

impl<W: Write + Send> Progress for TabSeparated<W> {
    fn host_alive(&mut self, host: &str, resolved_ip: &str) {
        let _ = writeln!(self.0, "{host}\t{resolved_ip}");
    }
}

/// Scan many hosts with the subprocess backend, sequentially, in input order.
pub async fn ping_hosts_cmd(
    hosts: &[String],
    count: u32,
    timeout_secs: u64,
    mut progress: Option<&mut dyn Progress>,
) -> ScanSummary {
    if hosts.is_empty() {
        return ScanSummary::from_results(Vec::new());
    }

    let platform = Platform::current();
    let total = hosts.len();
    tracing::info!(
        hosts = total,
        count,
        timeout_secs,
        "starting ping scan"
    );

    let mut results = Vec::with_capacity(total);
    for (idx, host) in hosts.iter().enumerate() {
        tracing::info!("[{}/{}] pinging {}", idx + 1, total, host);
        let res = ping_host_cmd_on(platform, host, count, timeout_secs).await;

        if res.alive {
            tracing::info!(
                "{} is alive (avg={:?} ms, loss={}%)",
                host,
                res.avg_response_time,
                res.packet_loss_percent
            );
            if let Some(sink) = progress.as_deref_mut() {
                let ip = res.resolved_ip.clone().unwrap_or_else(|| host.clone());
                sink.host_alive(host, &ip);
            }
        } else {
            match &res.error {
                Some(err) => tracing::info!("{} unreachable ({})", host, err),
                None => tracing::info!("{} unreachable", host),
            }
        }
        results.push(res);
    }

    let summary = ScanSummary::from_results(results);
    tracing::info!(
        alive = summary.summary.alive_count,
        total = summary.summary.total_count,
        success_rate = summary.summary.success_rate,
        "ping scan complete"
    );
    summary
}
