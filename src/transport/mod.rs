//! Packet transport abstraction.
//!
//! A [`Transport`] sends one constructed probe packet and synchronously waits
//! for a single correlated reply or a timeout. The real implementation lives
//! in [`raw`]; tests supply fakes with canned replies, so every probe
//! strategy classifies replies through the same [`Reply`] interface.

pub mod raw;

pub use raw::RawTransport;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;

/// A probe packet for the transport to frame and send.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbePacket {
    IcmpEcho {
        dst: IpAddr,
        ident: u16,
        seq: u16,
        ttl: u8,
        dont_fragment: bool,
        payload: Vec<u8>,
        interface: Option<String>,
    },
    TcpSyn {
        dst: IpAddr,
        port: u16,
    },
    UdpDatagram {
        dst: IpAddr,
        port: u16,
    },
    ArpRequest {
        target: Ipv4Addr,
        interface: Option<String>,
    },
}

/// Protocol layers a reply can carry, for `has_layer`/`layer` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ipv4,
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
    Arp,
}

/// One decoded protocol layer of a received reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Ipv4 { protocol: u8 },
    Icmp { icmp_type: u8, code: u8 },
    Icmpv6 { icmp_type: u8, code: u8 },
    Tcp { flags: u8 },
    Udp { src_port: u16 },
    Arp { sender_mac: [u8; 6] },
}

impl Layer {
    fn kind(&self) -> LayerKind {
        match self {
            Layer::Ipv4 { .. } => LayerKind::Ipv4,
            Layer::Icmp { .. } => LayerKind::Icmp,
            Layer::Icmpv6 { .. } => LayerKind::Icmpv6,
            Layer::Tcp { .. } => LayerKind::Tcp,
            Layer::Udp { .. } => LayerKind::Udp,
            Layer::Arp { .. } => LayerKind::Arp,
        }
    }
}

/// A received reply, decoded into its protocol layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    layers: Vec<Layer>,
    /// Human-readable rendering of the packet, carried into `ProbeResult.raw`.
    pub summary: String,
}

impl Reply {
    pub fn new(layers: Vec<Layer>) -> Self {
        let summary = format!("{layers:?}");
        Self { layers, summary }
    }

    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|l| l.kind() == kind)
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind() == kind)
    }
}

/// Outcome of one send/await cycle.
///
/// `reply == None` means the timeout elapsed with no correlated reply; that
/// is a classification input for the probe strategies, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    /// Reply arrival minus packet send, when a reply arrived.
    pub rtt: Option<Duration>,
    pub reply: Option<Reply>,
}

impl Exchange {
    pub fn timed_out() -> Self {
        Self {
            rtt: None,
            reply: None,
        }
    }

    pub fn replied(rtt: Duration, reply: Reply) -> Self {
        Self {
            rtt: Some(rtt),
            reply: Some(reply),
        }
    }

    /// RTT in milliseconds, unrounded.
    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt.map(|d| d.as_secs_f64() * 1000.0)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    /// Raw socket construction needs elevated privilege; surfaced distinctly
    /// from a timeout so the caller can report something actionable.
    #[error("raw socket requires elevated privileges: {0}")]
    PermissionDenied(String),
    #[error("transport error: {0}")]
    Io(String),
}

impl TransportError {
    pub(crate) fn from_io(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            TransportError::PermissionDenied(err.to_string())
        } else {
            TransportError::Io(format!("{context}: {err}"))
        }
    }
}

/// Capability to exchange one probe packet for at most one reply.
pub trait Transport: Send + Sync {
    fn exchange(
        &self,
        packet: &ProbePacket,
        timeout: Duration,
    ) -> Result<Exchange, TransportError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Deterministic transport for unit tests: scripted exchanges, replayed
    //! in order, with the last entry repeated once the script runs out.

    use super::*;
    use std::sync::Mutex;

    pub(crate) enum Scripted {
        Reply(Vec<Layer>),
        Timeout,
        Permission,
        Failure(String),
    }

    pub(crate) struct FakeTransport {
        script: Mutex<Vec<Scripted>>,
        pub sent: Mutex<Vec<ProbePacket>>,
    }

    impl FakeTransport {
        pub(crate) fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn always_replying(layers: Vec<Layer>) -> Self {
            Self::new(vec![Scripted::Reply(layers)])
        }

        pub(crate) fn always_timing_out() -> Self {
            Self::new(vec![Scripted::Timeout])
        }
    }

    impl Transport for FakeTransport {
        fn exchange(
            &self,
            packet: &ProbePacket,
            _timeout: Duration,
        ) -> Result<Exchange, TransportError> {
            self.sent.lock().unwrap().push(packet.clone());
            let mut script = self.script.lock().unwrap();
            let step = if script.len() > 1 {
                script.remove(0)
            } else {
                match script.first() {
                    Some(Scripted::Reply(layers)) => Scripted::Reply(layers.clone()),
                    Some(Scripted::Timeout) => Scripted::Timeout,
                    Some(Scripted::Permission) => Scripted::Permission,
                    Some(Scripted::Failure(msg)) => Scripted::Failure(msg.clone()),
                    None => Scripted::Timeout,
                }
            };
            match step {
                Scripted::Reply(layers) => Ok(Exchange::replied(
                    Duration::from_micros(1500),
                    Reply::new(layers),
                )),
                Scripted::Timeout => Ok(Exchange::timed_out()),
                Scripted::Permission => Err(TransportError::PermissionDenied(
                    "Operation not permitted".into(),
                )),
                Scripted::Failure(msg) => Err(TransportError::Io(msg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_layer_queries() {
        let reply = Reply::new(vec![
            Layer::Ipv4 { protocol: 6 },
            Layer::Tcp { flags: 0x12 },
        ]);
        assert!(reply.has_layer(LayerKind::Tcp));
        assert!(!reply.has_layer(LayerKind::Icmp));
        assert_eq!(
            reply.layer(LayerKind::Tcp),
            Some(&Layer::Tcp { flags: 0x12 })
        );
    }

    #[test]
    fn permission_errors_are_distinguished_from_io() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TransportError::from_io(denied, "socket"),
            TransportError::PermissionDenied(_)
        ));
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            TransportError::from_io(refused, "socket"),
            TransportError::Io(_)
        ));
    }
}
