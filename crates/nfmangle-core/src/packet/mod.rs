//! Packet decoding
//!
//! Low-level IPv4/TCP parsing over raw buffers delivered by the kernel.
//! Decoding never copies: a [`DecodedPacket`] borrows the raw bytes and
//! records header fields plus offsets into them.

mod builder;
pub mod checksum;
mod types;

pub use builder::PacketBuilder;
pub use types::*;

use crate::error::{Error, Result};
use bytes::Bytes;
use std::net::Ipv4Addr;
use tracing::trace;

/// Minimum IPv4 header length
pub const MIN_IPV4_HEADER_LEN: usize = 20;

/// Minimum TCP header length
pub const MIN_TCP_HEADER_LEN: usize = 20;

/// Largest datagram an IPv4 total-length field can describe
pub const MAX_IPV4_PACKET_LEN: usize = u16::MAX as usize;

/// A packet exactly as delivered by the kernel
///
/// Never mutated: any rewrite produces a new buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    id: u32,
    data: Bytes,
}

impl RawPacket {
    /// Wrap delivered bytes with their kernel message id
    pub fn new(id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Kernel-assigned message id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the raw bytes (no copy)
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Packet length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if packet is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the layers of this packet
    pub fn decode(&self) -> Result<DecodedPacket<'_>> {
        DecodedPacket::decode(&self.data)
    }
}

/// Layered view over a raw packet
#[derive(Debug, Clone, Copy)]
pub struct DecodedPacket<'a> {
    data: &'a [u8],
    network: NetworkLayer,
    transport: Option<TransportLayer>,
}

impl<'a> DecodedPacket<'a> {
    /// Decode a raw IP packet
    ///
    /// Fails only when the buffer cannot hold a well-formed IPv4 header.
    /// Unsupported or truncated upper layers decode to `None`.
    pub fn decode(data: &'a [u8]) -> Result<Self> {
        if data.len() < MIN_IPV4_HEADER_LEN {
            return Err(Error::PacketTooSmall {
                expected: MIN_IPV4_HEADER_LEN,
                actual: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != 4 {
            trace!(version, "Unsupported IP version");
            return Ok(Self {
                data,
                network: NetworkLayer::Unsupported { version },
                transport: None,
            });
        }

        let ipv4 = parse_ipv4(data)?;
        let transport = parse_tcp(data, &ipv4).map(TransportLayer::Tcp);

        Ok(Self {
            data,
            network: NetworkLayer::Ipv4(ipv4),
            transport,
        })
    }

    /// The bytes this view was decoded from
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Network layer
    pub fn network(&self) -> &NetworkLayer {
        &self.network
    }

    /// IPv4 header, if the network layer is IPv4
    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.network {
            NetworkLayer::Ipv4(header) => Some(header),
            NetworkLayer::Unsupported { .. } => None,
        }
    }

    /// Transport layer, if recognized
    pub fn transport(&self) -> Option<&TransportLayer> {
        self.transport.as_ref()
    }

    /// TCP header, if the transport layer is TCP
    pub fn tcp(&self) -> Option<&TcpHeader> {
        match &self.transport {
            Some(TransportLayer::Tcp(tcp)) => Some(tcp),
            None => None,
        }
    }

    /// Source and destination ports
    pub fn ports(&self) -> Option<(u16, u16)> {
        self.transport.as_ref().map(TransportLayer::ports)
    }

    /// Application payload
    ///
    /// Only present together with a transport layer.
    pub fn payload(&self) -> Option<&'a [u8]> {
        let range = self.transport.as_ref()?.payload_range();
        self.data.get(range)
    }
}

fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Parse the IPv4 header; caller guarantees at least 20 bytes
fn parse_ipv4(data: &[u8]) -> Result<Ipv4Header> {
    let header_len = usize::from(data[0] & 0x0F) * 4;
    if header_len < MIN_IPV4_HEADER_LEN {
        return Err(Error::packet_parse_at(
            format!("IPv4 header length {header_len} below minimum"),
            0,
        ));
    }
    if header_len > data.len() {
        return Err(Error::PacketTooSmall {
            expected: header_len,
            actual: data.len(),
        });
    }

    let flags_fragment = be16(data, 6);

    Ok(Ipv4Header {
        src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        protocol: data[9],
        ttl: data[8],
        identification: be16(data, 4),
        header_len,
        total_len: be16(data, 2),
        checksum: be16(data, 10),
        dont_fragment: flags_fragment & 0x4000 != 0,
        more_fragments: flags_fragment & 0x2000 != 0,
        fragment_offset: flags_fragment & 0x1FFF,
    })
}

/// Parse the TCP header, or `None` when the segment cannot be rewritten safely
fn parse_tcp(data: &[u8], ip: &Ipv4Header) -> Option<TcpHeader> {
    if ip.protocol != ip_proto::TCP {
        return None;
    }

    // Only the first fragment carries the header, and the checksum spans
    // the reassembled datagram.
    if ip.is_fragment() {
        trace!(id = ip.identification, "Skipping IPv4 fragment");
        return None;
    }

    let total_len = usize::from(ip.total_len);
    if total_len < ip.header_len || total_len > data.len() {
        trace!(total_len, buffer = data.len(), "IPv4 total length out of bounds");
        return None;
    }

    let offset = ip.header_len;
    let segment_len = total_len - offset;
    if segment_len < MIN_TCP_HEADER_LEN {
        trace!(segment_len, "Truncated TCP header");
        return None;
    }

    let header_len = usize::from(data[offset + 12] >> 4) * 4;
    if header_len < MIN_TCP_HEADER_LEN || header_len > segment_len {
        trace!(header_len, segment_len, "Invalid TCP data offset");
        return None;
    }

    Some(TcpHeader {
        src_port: be16(data, offset),
        dst_port: be16(data, offset + 2),
        seq: be32(data, offset + 4),
        ack: be32(data, offset + 8),
        header_len,
        flags: TcpFlags::from_bits_truncate(data[offset + 13]),
        window: be16(data, offset + 14),
        checksum: be16(data, offset + 16),
        offset,
        segment_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tcp_packet() -> Vec<u8> {
        // Minimal IPv4 TCP packet
        vec![
            // IPv4 header (20 bytes)
            0x45, 0x00, 0x00, 0x28, // Version, IHL, TOS, Total Length
            0x00, 0x01, 0x40, 0x00, // ID, Flags (DF), Fragment
            0x40, 0x06, 0x00, 0x00, // TTL, Protocol (TCP), Checksum
            0xC0, 0xA8, 0x01, 0x01, // Source IP (192.168.1.1)
            0xC0, 0xA8, 0x01, 0x02, // Dest IP (192.168.1.2)
            // TCP header (20 bytes)
            0x27, 0x0F, 0x01, 0xBB, // Src Port (9999), Dst Port (443)
            0x00, 0x00, 0x00, 0x01, // Sequence Number
            0x00, 0x00, 0x00, 0x01, // Ack Number
            0x50, 0x18, 0x00, 0x00, // Data Offset, Flags (ACK+PSH), Window
            0x00, 0x00, 0x00, 0x00, // Checksum, Urgent Pointer
        ]
    }

    #[test]
    fn test_packet_decode() {
        let data = create_test_tcp_packet();
        let packet = DecodedPacket::decode(&data).unwrap();

        let ip = packet.ipv4().unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ip.ttl, 64);
        assert!(ip.dont_fragment);

        let tcp = packet.tcp().unwrap();
        assert_eq!(tcp.src_port, 9999);
        assert_eq!(tcp.dst_port, 443);
        assert!(tcp.flags.contains(TcpFlags::ACK | TcpFlags::PSH));
        assert!(!tcp.flags.contains(TcpFlags::SYN));
        assert_eq!(packet.payload().map(<[u8]>::len), Some(0));
    }

    #[test]
    fn test_packet_too_small() {
        let data = vec![0x45, 0x00];
        let result = DecodedPacket::decode(&data);
        assert!(matches!(result, Err(Error::PacketTooSmall { .. })));
    }

    #[test]
    fn test_bad_ihl_is_decode_failure() {
        let mut data = create_test_tcp_packet();
        data[0] = 0x44;
        assert!(matches!(
            DecodedPacket::decode(&data),
            Err(Error::PacketParse { offset: Some(0), .. })
        ));

        data[0] = 0x4F; // 60-byte header in a 40-byte buffer
        assert!(matches!(
            DecodedPacket::decode(&data),
            Err(Error::PacketTooSmall { expected: 60, .. })
        ));
    }

    #[test]
    fn test_ipv6_decodes_without_transport() {
        let mut data = vec![0u8; 40];
        data[0] = 0x60;
        let packet = DecodedPacket::decode(&data).unwrap();
        assert_eq!(packet.network(), &NetworkLayer::Unsupported { version: 6 });
        assert!(packet.transport().is_none());
        assert!(packet.payload().is_none());
    }

    #[test]
    fn test_fragment_has_no_transport() {
        let mut data = create_test_tcp_packet();
        data[6] = 0x20; // MF
        let packet = DecodedPacket::decode(&data).unwrap();
        assert!(packet.ipv4().unwrap().is_fragment());
        assert!(packet.transport().is_none());
    }

    #[test]
    fn test_truncated_total_length() {
        let mut data = create_test_tcp_packet();
        data[3] = 0x40; // claims 64 bytes, buffer holds 40
        let packet = DecodedPacket::decode(&data).unwrap();
        assert!(packet.ipv4().is_some());
        assert!(packet.tcp().is_none());
    }

    #[test]
    fn test_raw_packet_accessors() {
        let raw = RawPacket::new(7, create_test_tcp_packet());
        assert_eq!(raw.id(), 7);
        assert_eq!(raw.len(), 40);
        assert!(!raw.is_empty());
        assert_eq!(raw.decode().unwrap().ports(), Some((9999, 443)));
    }
}
