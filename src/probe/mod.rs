//! Probe strategies for host reachability.
//!
//! Four packet-level strategies (ICMP echo, TCP SYN, UDP, ARP) plus a
//! reverse-DNS lookup. Each sends a single probe through an injected
//! [`Transport`](crate::transport::Transport) and classifies a single reply;
//! the ICMP module adds multi-echo aggregation and batch scanning on top.

mod arp;
mod icmp;
mod rdns;
mod tcp;
mod udp;

pub use arp::*;
pub use icmp::*;
pub use rdns::*;
pub use tcp::*;
pub use udp::*;

use std::time::Duration;

use thiserror::Error;

/// Failures that escape a probe instead of landing in its result.
///
/// Per-probe problems (timeouts, unexpected replies, resolution failures) are
/// recorded in `ProbeResult.error`; only conditions that make the whole
/// operation meaningless surface here.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("ICMP probing requires elevated privileges: {0}")]
    PermissionDenied(String),
    #[error("invalid probe input: {0}")]
    Input(String),
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Options for a single ICMP echo.
#[derive(Debug, Clone)]
pub struct EchoOptions {
    pub timeout: Duration,
    pub interface: Option<String>,
    pub ttl: u8,
    pub dont_fragment: bool,
    pub payload: Vec<u8>,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            interface: None,
            ttl: 64,
            dont_fragment: false,
            payload: b"hello".to_vec(),
        }
    }
}

/// Options for a multi-echo run.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub count: u32,
    /// Spacing between consecutive echoes; not applied after the last one.
    pub interval: Duration,
    pub echo: EchoOptions,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            count: 4,
            interval: Duration::from_millis(200),
            echo: EchoOptions::default(),
        }
    }
}
