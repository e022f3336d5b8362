//! Internet checksum (RFC 1071)
//!
//! One's-complement sum of 16-bit big-endian words. The helpers skip the
//! checksum field of the header they cover, so callers never need to zero
//! it before computing.

use super::types::ip_proto;
use std::net::Ipv4Addr;

/// Offset of the checksum field inside an IPv4 header
pub const IPV4_CHECKSUM_OFFSET: usize = 10;

/// Offset of the checksum field inside a TCP header
pub const TCP_CHECKSUM_OFFSET: usize = 16;

/// Incremental one's-complement accumulator
///
/// Chunks may have odd lengths; a trailing odd byte is carried into the
/// next chunk so the result matches checksumming the concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u64,
    pending: Option<u8>,
}

impl Checksum {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one 16-bit word
    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        self.sum += u64::from(word);
        self
    }

    /// Add a byte slice
    pub fn add_bytes(&mut self, mut data: &[u8]) -> &mut Self {
        if let Some(high) = self.pending.take() {
            match data.split_first() {
                Some((&low, rest)) => {
                    self.add_u16(u16::from_be_bytes([high, low]));
                    data = rest;
                }
                None => {
                    self.pending = Some(high);
                    return self;
                }
            }
        }

        let mut words = data.chunks_exact(2);
        for word in &mut words {
            self.add_u16(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = words.remainder() {
            self.pending = Some(*last);
        }
        self
    }

    /// Add a slice, leaving out the 16-bit field at `field_offset`
    pub fn add_bytes_skipping(&mut self, data: &[u8], field_offset: usize) -> &mut Self {
        if data.len() < field_offset + 2 {
            return self.add_bytes(data);
        }
        self.add_bytes(&data[..field_offset]);
        self.add_bytes(&data[field_offset + 2..])
    }

    /// Fold the carries and return the complemented checksum
    pub fn finish(mut self) -> u16 {
        if let Some(high) = self.pending.take() {
            // Odd trailing byte is padded with a zero low byte
            self.sum += u64::from(high) << 8;
        }
        let mut sum = self.sum;
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// Calculate Internet Checksum (RFC 1071) over a single buffer
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut acc = Checksum::new();
    acc.add_bytes(data);
    acc.finish()
}

/// Calculate the IPv4 header checksum, ignoring the stored checksum field
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut acc = Checksum::new();
    acc.add_bytes_skipping(header, IPV4_CHECKSUM_OFFSET);
    acc.finish()
}

/// Calculate the TCP checksum over the IPv4 pseudo-header and the segment,
/// ignoring the stored checksum field
pub fn tcp_checksum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut acc = Checksum::new();
    add_pseudo_header(&mut acc, src, dst, ip_proto::TCP, segment.len());
    acc.add_bytes_skipping(segment, TCP_CHECKSUM_OFFSET);
    acc.finish()
}

/// True if the stored IPv4 header checksum is valid
pub fn verify_ipv4_header(header: &[u8]) -> bool {
    internet_checksum(header) == 0
}

/// True if the stored TCP checksum is valid for this pseudo-header
pub fn verify_tcp_ipv4(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
    let mut acc = Checksum::new();
    add_pseudo_header(&mut acc, src, dst, ip_proto::TCP, segment.len());
    acc.add_bytes(segment);
    acc.finish() == 0
}

fn add_pseudo_header(acc: &mut Checksum, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: usize) {
    acc.add_bytes(&src.octets())
        .add_bytes(&dst.octets())
        .add_u16(u16::from(protocol))
        // Segment length never exceeds 65535 inside an IPv4 datagram
        .add_u16(len as u16);
}
