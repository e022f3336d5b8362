//! Packet re-serialization
//!
//! Splices a rewritten payload behind the original IPv4 and TCP headers and
//! recomputes every field that depends on the payload: IPv4 total length,
//! TCP checksum and IPv4 header checksum. Options in either header are kept
//! byte-for-byte.

use crate::error::{Error, Result};
use crate::packet::checksum::{
    ipv4_header_checksum, tcp_checksum_ipv4, IPV4_CHECKSUM_OFFSET, TCP_CHECKSUM_OFFSET,
};
use crate::packet::{DecodedPacket, MAX_IPV4_PACKET_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Offset of the total length field inside an IPv4 header
const IPV4_TOTAL_LEN_OFFSET: usize = 2;

/// Largest packet a modified verdict can hand back to the kernel
///
/// The packet travels in a netlink attribute whose 16-bit length also
/// counts the 4-byte attribute header.
pub const MAX_REWRITTEN_PACKET_LEN: usize = MAX_IPV4_PACKET_LEN - 4;

/// Build the outgoing packet for a rewritten payload
///
/// The packet must carry an IPv4 network layer and a TCP transport layer.
/// Bytes past the original total length are not carried over. The result is
/// only handed out once every length and checksum field is written.
pub fn reserialize(packet: &DecodedPacket<'_>, payload: &[u8]) -> Result<Bytes> {
    let ip = packet
        .ipv4()
        .ok_or_else(|| Error::serialize("packet has no IPv4 layer"))?;
    let tcp = packet
        .tcp()
        .ok_or_else(|| Error::serialize("packet has no TCP layer"))?;

    let headers_end = tcp.offset + tcp.header_len;
    let total_len = headers_end + payload.len();
    if total_len > MAX_REWRITTEN_PACKET_LEN {
        return Err(Error::serialize(format!(
            "total length {total_len} exceeds {MAX_REWRITTEN_PACKET_LEN}"
        )));
    }

    let original = packet.as_bytes();
    let mut out = BytesMut::with_capacity(total_len);
    out.put_slice(&original[..headers_end]);
    out.put_slice(payload);

    let total_len_field = u16::try_from(total_len)
        .map_err(|_| Error::serialize(format!("total length {total_len} does not fit 16 bits")))?;
    out[IPV4_TOTAL_LEN_OFFSET..IPV4_TOTAL_LEN_OFFSET + 2]
        .copy_from_slice(&total_len_field.to_be_bytes());

    let tcp_checksum = tcp_checksum_ipv4(ip.src, ip.dst, &out[tcp.offset..]);
    let at = tcp.offset + TCP_CHECKSUM_OFFSET;
    out[at..at + 2].copy_from_slice(&tcp_checksum.to_be_bytes());

    let ip_checksum = ipv4_header_checksum(&out[..ip.header_len]);
    out[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2]
        .copy_from_slice(&ip_checksum.to_be_bytes());

    trace!(
        old_len = ip.total_len,
        new_len = total_len,
        tcp_checksum = format_args!("{tcp_checksum:#06x}"),
        ip_checksum = format_args!("{ip_checksum:#06x}"),
        "Re-serialized packet"
    );

    Ok(out.freeze())
}
