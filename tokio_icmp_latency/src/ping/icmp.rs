use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpType, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// Echo header only, no payload.
pub const ECHO_REQUEST_SIZE: usize = 8;
pub const RECV_BUFFER_SIZE: usize = 1500;
/// How long a receive blocks before giving the caller a chance to stop.
pub const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

const IPV4_MIN_HEADER_SIZE: usize = 20;

/// Value carried in the echo identifier so replies to this process can be
/// told apart from other ICMP traffic on the host.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xFF_FF) as u16
}

pub fn build_echo_request(identifier: u16, sequence: u16) -> [u8; ECHO_REQUEST_SIZE] {
    let mut buffer = [0u8; ECHO_REQUEST_SIZE];
    let mut packet = MutableEchoRequestPacket::new(&mut buffer)
        .expect("buffer holds exactly one echo header");
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    let csum = pnet::packet::util::checksum(packet.packet(), 1);
    packet.set_checksum(csum);
    buffer
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedDatagram {
    #[error("truncated IPv4 header")]
    Ipv4Header,
    #[error("not an ICMP datagram")]
    NotIcmp,
    #[error("truncated ICMP header")]
    IcmpHeader,
}

/// The fields of an inbound ICMP datagram needed to correlate a reply.
///
/// `identifier` and `sequence` are read from the echo header layout whatever
/// the type; they are only meaningful for echo messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpDatagram {
    pub source: Ipv4Addr,
    pub icmp_type: IcmpType,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpDatagram {
    pub fn is_echo_reply_for(&self, destination: Ipv4Addr, identifier: u16) -> bool {
        self.source == destination
            && self.identifier == identifier
            && self.icmp_type == IcmpTypes::EchoReply
    }
}

/// Parses a datagram as read from a raw IPv4 ICMP socket (IP header included).
pub fn parse_datagram(datagram: &[u8]) -> Result<IcmpDatagram, MalformedDatagram> {
    let ipv4 = Ipv4Packet::new(datagram).ok_or(MalformedDatagram::Ipv4Header)?;
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return Err(MalformedDatagram::NotIcmp);
    }
    let header_size = ipv4.get_header_length() as usize * 4;
    if header_size < IPV4_MIN_HEADER_SIZE || header_size > datagram.len() {
        return Err(MalformedDatagram::Ipv4Header);
    }
    let echo =
        EchoReplyPacket::new(&datagram[header_size..]).ok_or(MalformedDatagram::IcmpHeader)?;
    Ok(IcmpDatagram {
        source: ipv4.get_source(),
        icmp_type: echo.get_icmp_type(),
        identifier: echo.get_identifier(),
        sequence: echo.get_sequence_number(),
    })
}

/// What a destination's probe tasks need from the network.
pub trait IcmpTransport: Send + Sync {
    /// Sends one ICMP message (no IP header) to `destination`.
    fn send_to(&self, packet: &[u8], destination: Ipv4Addr) -> io::Result<usize>;

    /// Blocks for at most a short poll window waiting for one inbound IPv4
    /// datagram. `Ok(None)` means nothing arrived in time.
    fn recv(&self, buffer: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Raw `AF_INET` ICMP socket. Needs `CAP_NET_RAW` or root.
///
/// Every raw ICMP socket on the host gets its own copy of each inbound ICMP
/// datagram, so one socket per destination is enough for each receiver to
/// see its replies.
#[derive(Debug)]
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    pub fn open(bind: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(bind, 0)))?;
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(RECV_POLL_TIMEOUT))?;
        Ok(Self { socket })
    }
}

impl IcmpTransport for RawSocket {
    fn send_to(&self, packet: &[u8], destination: Ipv4Addr) -> io::Result<usize> {
        self.socket
            .send_to(packet, &SockAddr::from(SocketAddrV4::new(destination, 0)))
    }

    fn recv(&self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
        match (&self.socket).read(buffer) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pnet::packet::icmp::echo_request::EchoRequestPacket;
    use pnet::packet::icmp::IcmpPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;

    /// Wraps an ICMP message in a minimal IPv4 header, as a raw socket
    /// would hand it back.
    pub(crate) fn ipv4_datagram(source: Ipv4Addr, icmp: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0u8; IPV4_MIN_HEADER_SIZE + icmp.len()];
        let mut ip = MutableIpv4Packet::new(&mut buffer).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((IPV4_MIN_HEADER_SIZE + icmp.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(source);
        ip.set_destination(Ipv4Addr::LOCALHOST);
        ip.set_payload(icmp);
        buffer
    }

    pub(crate) fn echo_reply(source: Ipv4Addr, identifier: u16, sequence: u16) -> Vec<u8> {
        let mut icmp = build_echo_request(identifier, sequence);
        icmp[0] = IcmpTypes::EchoReply.0;
        ipv4_datagram(source, &icmp)
    }

    #[test]
    fn echo_request_layout() {
        let packet = build_echo_request(0x1234, 42);
        let request = EchoRequestPacket::new(&packet).unwrap();
        assert_eq!(request.get_icmp_type(), IcmpTypes::EchoRequest);
        assert_eq!(request.get_identifier(), 0x1234);
        assert_eq!(request.get_sequence_number(), 42);

        let icmp = IcmpPacket::new(&packet).unwrap();
        assert_eq!(request.get_checksum(), pnet::packet::icmp::checksum(&icmp));
    }

    #[test]
    fn parses_echo_reply() {
        let source = Ipv4Addr::new(192, 0, 2, 7);
        let datagram = parse_datagram(&echo_reply(source, 99, 5)).unwrap();
        assert_eq!(
            datagram,
            IcmpDatagram {
                source,
                icmp_type: IcmpTypes::EchoReply,
                identifier: 99,
                sequence: 5,
            }
        );
        assert!(datagram.is_echo_reply_for(source, 99));
        assert!(!datagram.is_echo_reply_for(Ipv4Addr::new(192, 0, 2, 8), 99));
        assert!(!datagram.is_echo_reply_for(source, 98));
    }

    #[test]
    fn echo_request_is_not_a_reply() {
        let source = Ipv4Addr::LOCALHOST;
        let datagram = ipv4_datagram(source, &build_echo_request(1, 1));
        let parsed = parse_datagram(&datagram).unwrap();
        assert_eq!(parsed.icmp_type, IcmpTypes::EchoRequest);
        assert!(!parsed.is_echo_reply_for(source, 1));
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert_eq!(parse_datagram(&[]), Err(MalformedDatagram::Ipv4Header));
        assert_eq!(parse_datagram(&[0x45; 10]), Err(MalformedDatagram::Ipv4Header));

        let truncated = ipv4_datagram(Ipv4Addr::LOCALHOST, &[0, 0, 0]);
        assert_eq!(parse_datagram(&truncated), Err(MalformedDatagram::IcmpHeader));

        let mut not_icmp = echo_reply(Ipv4Addr::LOCALHOST, 1, 1);
        not_icmp[9] = IpNextHeaderProtocols::Udp.0;
        assert_eq!(parse_datagram(&not_icmp), Err(MalformedDatagram::NotIcmp));

        let mut bad_ihl = echo_reply(Ipv4Addr::LOCALHOST, 1, 1);
        bad_ihl[0] = 0x4F;
        assert_eq!(parse_datagram(&bad_ihl), Err(MalformedDatagram::Ipv4Header));
    }
}
