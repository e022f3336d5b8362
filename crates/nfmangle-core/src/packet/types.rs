//! Packet type definitions

use bitflags::bitflags;
use std::net::Ipv4Addr;
use std::ops::Range;

/// IP protocol numbers recognized by the decoder
pub mod ip_proto {
    /// ICMP
    pub const ICMP: u8 = 1;
    /// TCP
    pub const TCP: u8 = 6;
    /// UDP
    pub const UDP: u8 = 17;
}

bitflags! {
    /// TCP control flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        /// FIN flag
        const FIN = 0x01;
        /// SYN flag
        const SYN = 0x02;
        /// RST flag
        const RST = 0x04;
        /// PSH flag
        const PSH = 0x08;
        /// ACK flag
        const ACK = 0x10;
        /// URG flag
        const URG = 0x20;
        /// ECE flag
        const ECE = 0x40;
        /// CWR flag
        const CWR = 0x80;
    }
}

/// Parsed IPv4 header fields
///
/// Offsets are relative to the start of the raw packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Source address
    pub src: Ipv4Addr,
    /// Destination address
    pub dst: Ipv4Addr,
    /// Transport protocol number
    pub protocol: u8,
    /// Time to live
    pub ttl: u8,
    /// Identification field
    pub identification: u16,
    /// Header length in bytes (IHL * 4)
    pub header_len: usize,
    /// Total length field as carried on the wire
    pub total_len: u16,
    /// Header checksum as carried on the wire
    pub checksum: u16,
    /// Don't Fragment flag
    pub dont_fragment: bool,
    /// More Fragments flag
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units
    pub fragment_offset: u16,
}

impl Ipv4Header {
    /// True if this datagram is part of a fragmented packet
    pub fn is_fragment(&self) -> bool {
        self.more_fragments || self.fragment_offset != 0
    }
}

/// Parsed TCP header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Sequence number
    pub seq: u32,
    /// Acknowledgment number
    pub ack: u32,
    /// Header length in bytes (data offset * 4)
    pub header_len: usize,
    /// Control flags
    pub flags: TcpFlags,
    /// Window size
    pub window: u16,
    /// Checksum as carried on the wire
    pub checksum: u16,
    /// Offset of the TCP header in the raw packet
    pub offset: usize,
    /// Segment length (header + payload) as bounded by the IPv4 total length
    pub segment_len: usize,
}

impl TcpHeader {
    /// Byte range of the TCP header in the raw packet
    pub fn header_range(&self) -> Range<usize> {
        self.offset..self.offset + self.header_len
    }

    /// Byte range of the application payload in the raw packet
    pub fn payload_range(&self) -> Range<usize> {
        self.offset + self.header_len..self.offset + self.segment_len
    }

    /// Application payload length
    pub fn payload_len(&self) -> usize {
        self.segment_len - self.header_len
    }
}

/// Network layer of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    /// IPv4 header
    Ipv4(Ipv4Header),
    /// IP version the decoder does not handle
    Unsupported {
        /// Version nibble of the first byte
        version: u8,
    },
}

/// Transport layer of a decoded packet
///
/// TCP is the only transport the engine rewrites; everything else decodes
/// without a transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLayer {
    /// TCP header
    Tcp(TcpHeader),
}

impl TransportLayer {
    /// Source and destination ports
    pub fn ports(&self) -> (u16, u16) {
        match self {
            Self::Tcp(tcp) => (tcp.src_port, tcp.dst_port),
        }
    }

    /// Byte range of the application payload in the raw packet
    pub fn payload_range(&self) -> Range<usize> {
        match self {
            Self::Tcp(tcp) => tcp.payload_range(),
        }
    }
}
