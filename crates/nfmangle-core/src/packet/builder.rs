//! Packet builder utilities

use super::checksum::{ipv4_header_checksum, tcp_checksum_ipv4};
use super::{ip_proto, TcpFlags, MIN_IPV4_HEADER_LEN, MIN_TCP_HEADER_LEN};
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Builder for well-formed IPv4 packets with valid checksums
///
/// Used to craft traffic for tests and benchmarks.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    protocol: u8,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    identification: u16,
    ip_options: Vec<u8>,
    tcp_options: Vec<u8>,
    tcp_flags: TcpFlags,
    seq: u32,
    ack: u32,
    window: u16,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Create new IPv4 TCP packet builder
    pub fn tcp_v4() -> Self {
        Self {
            protocol: ip_proto::TCP,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            dst_port: 0,
            ttl: 64,
            identification: 0,
            ip_options: Vec::new(),
            tcp_options: Vec::new(),
            tcp_flags: TcpFlags::ACK | TcpFlags::PSH,
            seq: 0,
            ack: 0,
            window: 0xFFFF,
            payload: Vec::new(),
        }
    }

    /// Create a builder for an IPv4 packet carrying another protocol
    ///
    /// The payload is placed directly after the IPv4 header.
    pub fn ipv4(protocol: u8) -> Self {
        Self {
            protocol,
            ..Self::tcp_v4()
        }
    }

    /// Set source IP
    pub fn src_ip(mut self, ip: [u8; 4]) -> Self {
        self.src_ip = Ipv4Addr::from(ip);
        self
    }

    /// Set destination IP
    pub fn dst_ip(mut self, ip: [u8; 4]) -> Self {
        self.dst_ip = Ipv4Addr::from(ip);
        self
    }

    /// Set source port
    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    /// Set destination port
    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    /// Set TTL
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set IP identification
    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    /// Set IPv4 options (padded to a 4-byte boundary)
    pub fn ip_options(mut self, options: &[u8]) -> Self {
        self.ip_options = padded(options);
        self
    }

    /// Set TCP options (padded to a 4-byte boundary)
    pub fn tcp_options(mut self, options: &[u8]) -> Self {
        self.tcp_options = padded(options);
        self
    }

    /// Set TCP flags
    pub fn flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags = flags;
        self
    }

    /// Set sequence number
    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Set acknowledgment number
    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    /// Set window size
    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Set payload
    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the packet with lengths and checksums filled in
    pub fn build(self) -> Vec<u8> {
        let ip_header_len = MIN_IPV4_HEADER_LEN + self.ip_options.len();
        let is_tcp = self.protocol == ip_proto::TCP;
        let tcp_header_len = if is_tcp {
            MIN_TCP_HEADER_LEN + self.tcp_options.len()
        } else {
            0
        };
        let total_len = ip_header_len + tcp_header_len + self.payload.len();

        let mut packet = BytesMut::with_capacity(total_len);

        // IPv4 header
        packet.put_u8(0x40 | (ip_header_len / 4) as u8); // Version (4) + IHL
        packet.put_u8(0x00); // DSCP + ECN
        packet.put_u16(total_len as u16);
        packet.put_u16(self.identification);
        packet.put_u16(0x4000); // DF, no fragment offset
        packet.put_u8(self.ttl);
        packet.put_u8(self.protocol);
        packet.put_u16(0); // Header checksum (filled below)
        packet.put_slice(&self.src_ip.octets());
        packet.put_slice(&self.dst_ip.octets());
        packet.put_slice(&self.ip_options);

        if is_tcp {
            packet.put_u16(self.src_port);
            packet.put_u16(self.dst_port);
            packet.put_u32(self.seq);
            packet.put_u32(self.ack);
            packet.put_u8(((tcp_header_len / 4) as u8) << 4); // Data offset
            packet.put_u8(self.tcp_flags.bits());
            packet.put_u16(self.window);
            packet.put_u16(0); // Checksum (filled below)
            packet.put_u16(0); // Urgent pointer
            packet.put_slice(&self.tcp_options);
        }

        packet.put_slice(&self.payload);

        if is_tcp {
            let checksum = tcp_checksum_ipv4(self.src_ip, self.dst_ip, &packet[ip_header_len..]);
            let at = ip_header_len + 16;
            packet[at..at + 2].copy_from_slice(&checksum.to_be_bytes());
        }

        let checksum = ipv4_header_checksum(&packet[..ip_header_len]);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());

        packet.to_vec()
    }
}

fn padded(options: &[u8]) -> Vec<u8> {
    let mut out = options.to_vec();
    // Pad with End-of-Option-List
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::checksum::{verify_ipv4_header, verify_tcp_ipv4};
    use crate::packet::DecodedPacket;

    #[test]
    fn test_build_tcp_packet() {
        let packet = PacketBuilder::tcp_v4()
            .src_ip([192, 168, 1, 1])
            .dst_ip([192, 168, 1, 2])
            .src_port(12345)
            .dst_port(80)
            .ttl(64)
            .flags(TcpFlags::ACK | TcpFlags::PSH)
            .payload(b"GET / HTTP/1.1\r\n")
            .build();

        assert_eq!(packet[0] >> 4, 4); // IPv4
        assert_eq!(packet[9], 6); // TCP
        assert_eq!(packet.len(), 20 + 20 + 16); // IP + TCP + payload
        assert!(verify_ipv4_header(&packet[..20]));
        assert!(verify_tcp_ipv4(
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 2),
            &packet[20..]
        ));
    }

    #[test]
    fn test_build_with_options() {
        let packet = PacketBuilder::tcp_v4()
            .ip_options(&[0x01, 0x01, 0x01]) // NOPs, padded to 4
            .tcp_options(&[0x02, 0x04, 0x05, 0xb4, 0x01]) // MSS + NOP, padded to 8
            .payload(b"abc")
            .build();

        let decoded = DecodedPacket::decode(&packet).unwrap();
        assert_eq!(decoded.ipv4().unwrap().header_len, 24);
        assert_eq!(decoded.tcp().unwrap().header_len, 28);
        assert_eq!(decoded.payload(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_build_udp_packet() {
        let packet = PacketBuilder::ipv4(ip_proto::UDP).payload(&[0u8; 12]).build();
        assert_eq!(packet.len(), 32);
        assert_eq!(packet[9], 17);
        assert!(verify_ipv4_header(&packet[..20]));
    }
}
