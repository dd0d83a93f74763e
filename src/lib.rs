//! Multi-strategy host reachability probing.
//!
//! Probes hosts with raw-socket ICMP echoes, TCP SYNs, UDP datagrams, and ARP
//! requests, falls back to the system `ping` binary where raw sockets are
//! unavailable, and exposes the whole toolkit over an HTTP API.

pub mod command;
pub mod config;
pub mod probe;
pub mod resolver;
pub mod result;
pub mod transport;
pub mod web;

pub use config::ServerConfig;
pub use probe::{
    arp_ping, ping_icmp, ping_many_icmp, rdns_lookup, tcp_ping, udp_ping, ProbeError,
    SweepOptions,
};
pub use result::{ProbeResult, RdnsResult, ScanSummary};
