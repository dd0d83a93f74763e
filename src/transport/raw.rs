//! Real packet transport built on raw sockets.
//!
//! ICMP echoes go through `socket2` (RAW socket first, DGRAM fallback for
//! unprivileged use). TCP SYN probes use pnet layer-4 transport channels so
//! the reply flags are visible without completing a handshake. UDP probes use
//! a plain connected datagram socket: the kernel surfaces an ICMP
//! port-unreachable as `ECONNREFUSED` on receive. ARP requests go out over a
//! pnet datalink channel.

use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags};
use pnet::packet::Packet;
use pnet::transport::{
    icmp_packet_iter, tcp_packet_iter, transport_channel, TransportChannelType::Layer4,
    TransportProtocol,
};
use pnet::util::MacAddr;
use socket2::{Domain, Protocol, Socket, Type};

use super::{Exchange, Layer, ProbePacket, Reply, Transport, TransportError};

const RECV_SLICE: Duration = Duration::from_millis(50);

/// Transport backed by the operating system's raw packet facilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawTransport;

impl Transport for RawTransport {
    fn exchange(
        &self,
        packet: &ProbePacket,
        timeout: Duration,
    ) -> Result<Exchange, TransportError> {
        match packet {
            ProbePacket::IcmpEcho {
                dst,
                ident,
                seq,
                ttl,
                dont_fragment: _,
                payload,
                interface,
            } => icmp_exchange(*dst, *ident, *seq, *ttl, payload, interface.as_deref(), timeout),
            ProbePacket::TcpSyn { dst, port } => tcp_exchange(*dst, *port, timeout),
            ProbePacket::UdpDatagram { dst, port } => udp_exchange(*dst, *port, timeout),
            ProbePacket::ArpRequest { target, interface } => {
                arp_exchange(*target, interface.as_deref(), timeout)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ICMP / ICMPv6
// ---------------------------------------------------------------------------

fn icmp_exchange(
    dst: IpAddr,
    ident: u16,
    seq: u16,
    ttl: u8,
    payload: &[u8],
    interface: Option<&str>,
    timeout: Duration,
) -> Result<Exchange, TransportError> {
    match dst {
        IpAddr::V4(v4) => icmp_exchange_v4(v4, ident, seq, ttl, payload, interface, timeout),
        IpAddr::V6(v6) => icmp_exchange_v6(v6, ident, seq, ttl, payload, interface, timeout),
    }
}

fn icmp_socket(domain: Domain, protocol: Protocol) -> Result<(Socket, bool), TransportError> {
    // RAW first (sees every ICMP type), DGRAM for unprivileged hosts.
    match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(s) => Ok((s, true)),
        Err(raw_err) => match Socket::new(domain, Type::DGRAM, Some(protocol)) {
            Ok(s) => Ok((s, false)),
            Err(_) => Err(TransportError::from_io(raw_err, "create ICMP socket")),
        },
    }
}

#[allow(unused_variables)]
fn bind_interface(socket: &Socket, interface: Option<&str>) -> Result<(), TransportError> {
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    if let Some(name) = interface {
        socket
            .bind_device(Some(name.as_bytes()))
            .map_err(|e| TransportError::from_io(e, "bind to interface"))?;
    }
    Ok(())
}

fn icmp_exchange_v4(
    dst: Ipv4Addr,
    ident: u16,
    seq: u16,
    ttl: u8,
    payload: &[u8],
    interface: Option<&str>,
    timeout: Duration,
) -> Result<Exchange, TransportError> {
    let (socket, raw) = icmp_socket(Domain::IPV4, Protocol::ICMPV4)?;
    socket
        .set_ttl(u32::from(ttl))
        .map_err(|e| TransportError::from_io(e, "set TTL"))?;
    bind_interface(&socket, interface)?;
    socket
        .connect(&SocketAddr::new(IpAddr::V4(dst), 0).into())
        .map_err(|e| TransportError::from_io(e, "connect"))?;

    let packet = build_echo_request(8, ident, seq, payload, true);
    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| TransportError::from_io(e, "send echo request"))?;

    let deadline = start + timeout;
    loop {
        let Some(buf) = recv_until(&socket, deadline)? else {
            return Ok(Exchange::timed_out());
        };
        let elapsed = start.elapsed();

        // RAW sockets hand back the IP header, DGRAM sockets start at ICMP.
        let offset = if !buf.is_empty() && buf[0] >> 4 == 4 { 20 } else { 0 };
        if buf.len() < offset + 8 {
            continue;
        }
        let icmp_type = buf[offset];
        let code = buf[offset + 1];
        if icmp_type == 0 {
            let reply_ident = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            let reply_seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);
            // DGRAM ICMP sockets rewrite the identifier; only demultiplex our
            // own echo replies on raw sockets.
            if raw && (reply_ident != ident || reply_seq != seq) {
                continue;
            }
        }

        let mut layers = Vec::new();
        if offset == 20 {
            layers.push(Layer::Ipv4 { protocol: buf[9] });
        }
        layers.push(Layer::Icmp { icmp_type, code });
        return Ok(Exchange::replied(elapsed, Reply::new(layers)));
    }
}

fn icmp_exchange_v6(
    dst: Ipv6Addr,
    ident: u16,
    seq: u16,
    ttl: u8,
    payload: &[u8],
    interface: Option<&str>,
    timeout: Duration,
) -> Result<Exchange, TransportError> {
    let (socket, raw) = icmp_socket(Domain::IPV6, Protocol::ICMPV6)?;
    socket
        .set_unicast_hops_v6(u32::from(ttl))
        .map_err(|e| TransportError::from_io(e, "set hop limit"))?;
    bind_interface(&socket, interface)?;
    socket
        .connect(&SocketAddr::new(IpAddr::V6(dst), 0).into())
        .map_err(|e| TransportError::from_io(e, "connect"))?;

    // The kernel computes the ICMPv6 checksum.
    let packet = build_echo_request(128, ident, seq, payload, false);
    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| TransportError::from_io(e, "send echo request"))?;

    let deadline = start + timeout;
    loop {
        let Some(buf) = recv_until(&socket, deadline)? else {
            return Ok(Exchange::timed_out());
        };
        let elapsed = start.elapsed();
        if buf.len() < 8 {
            continue;
        }
        let icmp_type = buf[0];
        let code = buf[1];
        if icmp_type == 129 {
            let reply_ident = u16::from_be_bytes([buf[4], buf[5]]);
            let reply_seq = u16::from_be_bytes([buf[6], buf[7]]);
            if raw && (reply_ident != ident || reply_seq != seq) {
                continue;
            }
        }
        let layers = vec![Layer::Icmpv6 { icmp_type, code }];
        return Ok(Exchange::replied(elapsed, Reply::new(layers)));
    }
}

/// Receive one datagram, or `None` once the deadline passes.
fn recv_until(socket: &Socket, deadline: Instant) -> Result<Option<Vec<u8>>, TransportError> {
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(None);
        };
        socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
            .map_err(|e| TransportError::from_io(e, "set read timeout"))?;
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        match socket.recv(&mut buf) {
            Ok(len) => {
                // SAFETY: recv initialized `len` bytes
                let bytes =
                    unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
                return Ok(Some(bytes.to_vec()));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(None);
            }
            Err(e) => return Err(TransportError::from_io(e, "receive reply")),
        }
    }
}

fn build_echo_request(
    icmp_type: u8,
    ident: u16,
    seq: u16,
    payload: &[u8],
    checksum: bool,
) -> Vec<u8> {
    let mut packet = vec![0u8; 8 + payload.len()];
    packet[0] = icmp_type;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    packet[8..].copy_from_slice(payload);
    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

// ---------------------------------------------------------------------------
// TCP SYN
// ---------------------------------------------------------------------------

fn tcp_exchange(dst: IpAddr, port: u16, timeout: Duration) -> Result<Exchange, TransportError> {
    let IpAddr::V4(dst_v4) = dst else {
        return Err(TransportError::Io("TCP SYN probing supports IPv4 only".into()));
    };
    let src_ip = local_source_ip(dst)?;
    let IpAddr::V4(src_v4) = src_ip else {
        return Err(TransportError::Io("no IPv4 source address".into()));
    };

    let (mut tcp_tx, mut tcp_rx) = transport_channel(
        4096,
        Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Tcp)),
    )
    .map_err(|e| TransportError::from_io(e, "open TCP transport channel"))?;
    let (_icmp_tx, mut icmp_rx) = transport_channel(
        4096,
        Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp)),
    )
    .map_err(|e| TransportError::from_io(e, "open ICMP transport channel"))?;

    let src_port = 49152 + (rand::random::<u16>() % 16384);
    let mut buf = [0u8; 20];
    let mut syn = MutableTcpPacket::new(&mut buf)
        .ok_or_else(|| TransportError::Io("TCP packet buffer too small".into()))?;
    syn.set_source(src_port);
    syn.set_destination(port);
    syn.set_sequence(rand::random());
    syn.set_acknowledgement(0);
    syn.set_data_offset(5);
    syn.set_flags(TcpFlags::SYN);
    syn.set_window(64240);
    syn.set_urgent_ptr(0);
    let checksum = tcp::ipv4_checksum(&syn.to_immutable(), &src_v4, &dst_v4);
    syn.set_checksum(checksum);

    let start = Instant::now();
    tcp_tx
        .send_to(syn.to_immutable(), dst)
        .map_err(|e| TransportError::from_io(e, "send SYN"))?;

    let deadline = start + timeout;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(Exchange::timed_out());
        };
        let slice = RECV_SLICE.min(remaining);

        match tcp_packet_iter(&mut tcp_rx).next_with_timeout(slice) {
            Ok(Some((pkt, addr))) => {
                if addr == dst && pkt.get_destination() == src_port && pkt.get_source() == port {
                    let layers = vec![
                        Layer::Ipv4 { protocol: 6 },
                        Layer::Tcp {
                            flags: pkt.get_flags(),
                        },
                    ];
                    return Ok(Exchange::replied(start.elapsed(), Reply::new(layers)));
                }
            }
            Ok(None) => {}
            Err(e) => return Err(TransportError::from_io(e, "receive TCP reply")),
        }

        match icmp_packet_iter(&mut icmp_rx).next_with_timeout(Duration::from_millis(1)) {
            Ok(Some((pkt, _addr))) => {
                if icmp_error_concerns_probe(pkt.packet(), dst_v4, port) {
                    let layers = vec![
                        Layer::Ipv4 { protocol: 1 },
                        Layer::Icmp {
                            icmp_type: pkt.get_icmp_type().0,
                            code: pkt.get_icmp_code().0,
                        },
                    ];
                    return Ok(Exchange::replied(start.elapsed(), Reply::new(layers)));
                }
            }
            Ok(None) => {}
            Err(e) => return Err(TransportError::from_io(e, "receive ICMP reply")),
        }
    }
}

/// True when an ICMP error packet quotes a probe we sent to `dst`:`port`.
fn icmp_error_concerns_probe(icmp_packet: &[u8], dst: Ipv4Addr, port: u16) -> bool {
    // ICMP error layout: 8-byte header, then the offending IP header + the
    // first 8 bytes of its payload.
    if icmp_packet.len() < 8 {
        return false;
    }
    let icmp_type = icmp_packet[0];
    if icmp_type != 3 && icmp_type != 11 {
        return false;
    }
    let inner = &icmp_packet[8..];
    if inner.len() < 20 {
        return false;
    }
    let quoted_dst = Ipv4Addr::new(inner[16], inner[17], inner[18], inner[19]);
    if quoted_dst != dst {
        return false;
    }
    let ihl = usize::from(inner[0] & 0x0F) * 4;
    if inner.len() < ihl + 4 {
        return false;
    }
    let quoted_dst_port = u16::from_be_bytes([inner[ihl + 2], inner[ihl + 3]]);
    quoted_dst_port == port
}

/// Local address the kernel would route towards `dst` from.
fn local_source_ip(dst: IpAddr) -> Result<IpAddr, TransportError> {
    let bind_addr = match dst {
        IpAddr::V4(_) => "0.0.0.0:0",
        IpAddr::V6(_) => "[::]:0",
    };
    let socket = UdpSocket::bind(bind_addr)
        .map_err(|e| TransportError::from_io(e, "bind source discovery socket"))?;
    socket
        .connect(SocketAddr::new(dst, 53))
        .map_err(|e| TransportError::from_io(e, "route source discovery"))?;
    let local = socket
        .local_addr()
        .map_err(|e| TransportError::from_io(e, "read local address"))?;
    Ok(local.ip())
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

fn udp_exchange(dst: IpAddr, port: u16, timeout: Duration) -> Result<Exchange, TransportError> {
    let bind_addr = match dst {
        IpAddr::V4(_) => "0.0.0.0:0",
        IpAddr::V6(_) => "[::]:0",
    };
    let socket =
        UdpSocket::bind(bind_addr).map_err(|e| TransportError::from_io(e, "bind UDP socket"))?;
    socket
        .connect(SocketAddr::new(dst, port))
        .map_err(|e| TransportError::from_io(e, "connect UDP socket"))?;

    let start = Instant::now();
    socket
        .send(&[])
        .map_err(|e| TransportError::from_io(e, "send UDP datagram"))?;

    let deadline = start + timeout;
    let mut buf = [0u8; 1500];
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(Exchange::timed_out());
        };
        socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
            .map_err(|e| TransportError::from_io(e, "set read timeout"))?;
        match socket.recv(&mut buf) {
            Ok(_len) => {
                // An actual datagram came back from the far end.
                let layers = vec![Layer::Udp { src_port: port }];
                return Ok(Exchange::replied(start.elapsed(), Reply::new(layers)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                // The kernel translated an ICMP port-unreachable for us.
                let layers = vec![
                    Layer::Ipv4 { protocol: 1 },
                    Layer::Icmp {
                        icmp_type: 3,
                        code: 3,
                    },
                ];
                return Ok(Exchange::replied(start.elapsed(), Reply::new(layers)));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(Exchange::timed_out());
            }
            Err(e) => return Err(TransportError::from_io(e, "receive UDP reply")),
        }
    }
}

// ---------------------------------------------------------------------------
// ARP
// ---------------------------------------------------------------------------

fn arp_exchange(
    target: Ipv4Addr,
    interface: Option<&str>,
    timeout: Duration,
) -> Result<Exchange, TransportError> {
    let iface = select_interface(interface)?;
    let source_mac = iface
        .mac
        .ok_or_else(|| TransportError::Io(format!("interface {} has no MAC", iface.name)))?;
    let source_ip = iface
        .ips
        .iter()
        .find_map(|net| match net.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            TransportError::Io(format!("interface {} has no IPv4 address", iface.name))
        })?;

    let config = datalink::Config {
        read_timeout: Some(RECV_SLICE),
        ..Default::default()
    };
    let (mut tx, mut rx) = match datalink::channel(&iface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(TransportError::Io("unsupported datalink channel".into())),
        Err(e) => return Err(TransportError::from_io(e, "open datalink channel")),
    };

    let mut arp_buf = [0u8; 28];
    let mut arp = MutableArpPacket::new(&mut arp_buf)
        .ok_or_else(|| TransportError::Io("ARP packet buffer too small".into()))?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(source_mac);
    arp.set_sender_proto_addr(source_ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(target);

    let mut eth_buf = [0u8; 42];
    let mut eth = MutableEthernetPacket::new(&mut eth_buf)
        .ok_or_else(|| TransportError::Io("ethernet packet buffer too small".into()))?;
    eth.set_destination(MacAddr::broadcast());
    eth.set_source(source_mac);
    eth.set_ethertype(EtherTypes::Arp);
    eth.set_payload(arp.packet());

    let start = Instant::now();
    tx.send_to(eth.packet(), None)
        .ok_or_else(|| TransportError::Io("link-layer send not supported".into()))?
        .map_err(|e| TransportError::from_io(e, "send ARP request"))?;

    let deadline = start + timeout;
    loop {
        if Instant::now() >= deadline {
            return Ok(Exchange::timed_out());
        }
        let frame = match rx.next() {
            Ok(frame) => frame,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(TransportError::from_io(e, "receive frame")),
        };
        let Some(eth) = EthernetPacket::new(frame) else {
            continue;
        };
        if eth.get_ethertype() != EtherTypes::Arp {
            continue;
        }
        let Some(reply) = ArpPacket::new(eth.payload()) else {
            continue;
        };
        if reply.get_operation() == ArpOperations::Reply && reply.get_sender_proto_addr() == target
        {
            let sender = reply.get_sender_hw_addr();
            let layers = vec![Layer::Arp {
                sender_mac: [sender.0, sender.1, sender.2, sender.3, sender.4, sender.5],
            }];
            return Ok(Exchange::replied(start.elapsed(), Reply::new(layers)));
        }
    }
}

fn select_interface(name: Option<&str>) -> Result<NetworkInterface, TransportError> {
    let interfaces = datalink::interfaces();
    if let Some(name) = name {
        return interfaces
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| TransportError::Io(format!("no such interface: {name}")));
    }
    interfaces
        .into_iter()
        .find(|i| i.is_up() && !i.is_loopback() && i.mac.is_some() && i.ips.iter().any(|n| n.is_ipv4()))
        .ok_or_else(|| TransportError::Io("no usable network interface".into()))
}
