//! nfnetlink queue message codec
//!
//! Builds the configuration and verdict requests sent to the queue
//! subsystem and parses the datagrams it sends back. Netlink headers use
//! host byte order, queue attribute payloads use network byte order.

use crate::traits::{QueueMessage, VerdictCode};
use bytes::Bytes;

const NLMSG_HDR_LEN: usize = 16;
const NFGENMSG_LEN: usize = 4;
const NLA_HDR_LEN: usize = 4;

const NLMSG_ERROR: u16 = 2;

const NFNL_SUBSYS_QUEUE: u16 = 3;
const NFNETLINK_V0: u8 = 0;
const AF_UNSPEC: u8 = 0;

const NFQNL_MSG_PACKET: u16 = 0;
const NFQNL_MSG_VERDICT: u16 = 1;
const NFQNL_MSG_CONFIG: u16 = 2;

const NLM_F_REQUEST: u16 = 1;
const NLM_F_ACK: u16 = 4;

const NFQA_PACKET_HDR: u16 = 1;
const NFQA_VERDICT_HDR: u16 = 2;
const NFQA_MARK: u16 = 3;
const NFQA_PAYLOAD: u16 = 10;

const NFQA_CFG_CMD: u16 = 1;
const NFQA_CFG_PARAMS: u16 = 2;
const NFQA_CFG_QUEUE_MAXLEN: u16 = 3;

const NFQNL_COPY_PACKET: u8 = 2;

/// Attribute types carry flag bits above this mask
const NLA_TYPE_MASK: u16 = 0x3fff;

/// Largest replacement packet a verdict attribute can carry
pub const MAX_VERDICT_PAYLOAD_LEN: usize = u16::MAX as usize - NLA_HDR_LEN;

/// Queue configuration commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigCommand {
    /// Attach to a queue number
    Bind = 1,
    /// Detach from a queue number
    Unbind = 2,
    /// Bind a protocol family
    PfBind = 3,
    /// Release a protocol family
    PfUnbind = 4,
}

impl ConfigCommand {
    /// Request name used in errors and logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Bind => "bind queue",
            Self::Unbind => "unbind queue",
            Self::PfBind => "bind family",
            Self::PfUnbind => "unbind family",
        }
    }
}

/// Netlink message under construction
struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    fn new(msg: u16, flags: u16, seq: u32, family: u8, res_id: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        // nlmsg_len is patched in finish()
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&((NFNL_SUBSYS_QUEUE << 8) | msg).to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());

        buf.push(family);
        buf.push(NFNETLINK_V0);
        buf.extend_from_slice(&res_id.to_be_bytes());
        Self { buf }
    }

    fn attr(mut self, attr_type: u16, data: &[u8]) -> Self {
        debug_assert!(data.len() <= MAX_VERDICT_PAYLOAD_LEN);
        let len = (NLA_HDR_LEN + data.len()) as u16;
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(data);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }
}

fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Configuration command request, acknowledged by the kernel
pub fn config_command(seq: u32, command: ConfigCommand, family: u16, queue: u16) -> Vec<u8> {
    MessageBuilder::new(
        NFQNL_MSG_CONFIG,
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        AF_UNSPEC,
        queue,
    )
    .attr(NFQA_CFG_CMD, &config_cmd_data(command, family))
    .finish()
}

fn config_cmd_data(command: ConfigCommand, family: u16) -> [u8; 4] {
    let pf = family.to_be_bytes();
    [command as u8, 0, pf[0], pf[1]]
}

/// Copy mode request: full packets up to `copy_range` bytes
pub fn config_params(seq: u32, queue: u16, copy_range: u32) -> Vec<u8> {
    let mut params = [0u8; 5];
    params[..4].copy_from_slice(&copy_range.to_be_bytes());
    params[4] = NFQNL_COPY_PACKET;

    MessageBuilder::new(
        NFQNL_MSG_CONFIG,
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        AF_UNSPEC,
        queue,
    )
    .attr(NFQA_CFG_PARAMS, &params)
    .finish()
}

/// Queue length request
pub fn config_max_len(seq: u32, queue: u16, max_len: u32) -> Vec<u8> {
    MessageBuilder::new(
        NFQNL_MSG_CONFIG,
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        AF_UNSPEC,
        queue,
    )
    .attr(NFQA_CFG_QUEUE_MAXLEN, &max_len.to_be_bytes())
    .finish()
}

/// Replacement packet longer than [`MAX_VERDICT_PAYLOAD_LEN`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTooLarge(pub usize);

impl std::fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "replacement of {} bytes exceeds {MAX_VERDICT_PAYLOAD_LEN}",
            self.0
        )
    }
}

/// Verdict request, optionally carrying replacement packet bytes
pub fn verdict(
    seq: u32,
    queue: u16,
    id: u32,
    code: VerdictCode,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, PayloadTooLarge> {
    if let Some(payload) = payload.filter(|p| p.len() > MAX_VERDICT_PAYLOAD_LEN) {
        return Err(PayloadTooLarge(payload.len()));
    }

    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&code.raw().to_be_bytes());
    header[4..].copy_from_slice(&id.to_be_bytes());

    let mut msg = MessageBuilder::new(NFQNL_MSG_VERDICT, NLM_F_REQUEST, seq, AF_UNSPEC, queue)
        .attr(NFQA_VERDICT_HDR, &header);
    if let Some(payload) = payload {
        msg = msg.attr(NFQA_PAYLOAD, payload);
    }
    Ok(msg.finish())
}

/// One message parsed out of a received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A queued packet
    Packet(QueueMessage),
    /// Acknowledgement or error for request `seq`; `errno` is 0 on success
    Status {
        /// Sequence number of the request
        seq: u32,
        /// Positive errno, or 0
        errno: i32,
    },
    /// Anything else, by message type
    Other(u16),
    /// A message that could not be parsed
    Malformed(ParseError),
}

/// Why a message could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub &'static str);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Split a datagram into its netlink messages
///
/// Each message is parsed on its own: a malformed one shows up as
/// [`Incoming::Malformed`] without hiding its neighbours. Parsing stops at
/// the first message whose length runs past the datagram.
pub fn parse_datagram(data: &[u8]) -> Vec<Incoming> {
    let mut messages = Vec::new();
    let mut pos = 0;

    while pos + NLMSG_HDR_LEN <= data.len() {
        let len = read_u32_ne(&data[pos..]) as usize;
        if len < NLMSG_HDR_LEN || pos + len > data.len() {
            messages.push(Incoming::Malformed(ParseError("truncated netlink message")));
            break;
        }
        messages.push(parse_message(&data[pos..pos + len]));
        pos += align(len);
    }

    messages
}

fn parse_message(msg: &[u8]) -> Incoming {
    let msg_type = u16::from_ne_bytes([msg[4], msg[5]]);
    let seq = read_u32_ne(&msg[8..]);

    match msg_type {
        NLMSG_ERROR => {
            if msg.len() < NLMSG_HDR_LEN + 4 {
                return Incoming::Malformed(ParseError("truncated netlink error"));
            }
            let error = i32::from_ne_bytes([msg[16], msg[17], msg[18], msg[19]]);
            Incoming::Status {
                seq,
                errno: -error,
            }
        }
        t if t == (NFNL_SUBSYS_QUEUE << 8) | NFQNL_MSG_PACKET => {
            parse_packet(msg).map_or_else(Incoming::Malformed, Incoming::Packet)
        }
        other => Incoming::Other(other),
    }
}

fn parse_packet(msg: &[u8]) -> Result<QueueMessage, ParseError> {
    let mut pos = NLMSG_HDR_LEN + NFGENMSG_LEN;
    if msg.len() < pos {
        return Err(ParseError("truncated packet message"));
    }

    let mut header = None;
    let mut mark = None;
    let mut payload = Bytes::new();

    while pos + NLA_HDR_LEN <= msg.len() {
        let attr_len = u16::from_ne_bytes([msg[pos], msg[pos + 1]]) as usize;
        let attr_type = u16::from_ne_bytes([msg[pos + 2], msg[pos + 3]]) & NLA_TYPE_MASK;
        if attr_len < NLA_HDR_LEN || pos + attr_len > msg.len() {
            return Err(ParseError("truncated attribute"));
        }
        let data = &msg[pos + NLA_HDR_LEN..pos + attr_len];

        match attr_type {
            NFQA_PACKET_HDR if data.len() >= 7 => {
                let id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let hw_protocol = u16::from_be_bytes([data[4], data[5]]);
                header = Some((id, hw_protocol, data[6]));
            }
            NFQA_MARK if data.len() >= 4 => {
                mark = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            NFQA_PAYLOAD => payload = Bytes::copy_from_slice(data),
            _ => {}
        }

        pos += align(attr_len);
    }

    let (id, hw_protocol, hook) = header.ok_or(ParseError("packet message without header"))?;
    Ok(QueueMessage {
        id,
        hw_protocol,
        hook,
        mark,
        payload,
    })
}

fn read_u32_ne(data: &[u8]) -> u32 {
    u32::from_ne_bytes([data[0], data[1], data[2], data[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Kernel-side packet message, as nfnetlink_queue would send it
    fn packet_message(seq: u32, id: u32, mark: Option<u32>, payload: &[u8]) -> Vec<u8> {
        let mut header = [0u8; 7];
        header[..4].copy_from_slice(&id.to_be_bytes());
        header[4..6].copy_from_slice(&0x0800u16.to_be_bytes());
        header[6] = 0;

        let mut msg =
            MessageBuilder::new(NFQNL_MSG_PACKET, 0, seq, 2, 0).attr(NFQA_PACKET_HDR, &header);
        if let Some(mark) = mark {
            msg = msg.attr(NFQA_MARK, &mark.to_be_bytes());
        }
        msg.attr(NFQA_PAYLOAD, payload).finish()
    }

    fn error_message(seq: u32, errno: i32) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&36u32.to_ne_bytes());
        msg.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        msg.extend_from_slice(&0u16.to_ne_bytes());
        msg.extend_from_slice(&seq.to_ne_bytes());
        msg.extend_from_slice(&0u32.to_ne_bytes());
        msg.extend_from_slice(&(-errno).to_ne_bytes());
        msg.extend_from_slice(&[0u8; 16]);
        msg
    }

    #[test]
    fn test_config_command_layout() {
        let msg = config_command(7, ConfigCommand::PfBind, 2, 0);
        assert_eq!(msg.len(), 28);
        assert_eq!(read_u32_ne(&msg), 28);
        assert_eq!(u16::from_ne_bytes([msg[4], msg[5]]), 0x0302);
        assert_eq!(u16::from_ne_bytes([msg[6], msg[7]]), NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(read_u32_ne(&msg[8..]), 7);
        // nfgenmsg
        assert_eq!(&msg[16..20], &[0, 0, 0, 0]);
        // attribute: len 8, type CMD, command then big-endian family
        assert_eq!(u16::from_ne_bytes([msg[20], msg[21]]), 8);
        assert_eq!(u16::from_ne_bytes([msg[22], msg[23]]), NFQA_CFG_CMD);
        assert_eq!(&msg[24..28], &[3, 0, 0, 2]);
    }

    #[test]
    fn test_config_params_padded() {
        let msg = config_params(1, 5, 65535);
        // 5-byte payload padded to 8
        assert_eq!(msg.len(), 16 + 4 + 12);
        assert_eq!(&msg[18..20], &5u16.to_be_bytes());
        assert_eq!(u16::from_ne_bytes([msg[20], msg[21]]), 9);
        assert_eq!(&msg[24..28], &65535u32.to_be_bytes());
        assert_eq!(msg[28], NFQNL_COPY_PACKET);
    }

    #[test]
    fn test_max_len_request() {
        let msg = config_max_len(2, 0, 4096);
        assert_eq!(u16::from_ne_bytes([msg[22], msg[23]]), NFQA_CFG_QUEUE_MAXLEN);
        assert_eq!(&msg[24..28], &4096u32.to_be_bytes());
    }

    #[test]
    fn test_verdict_without_payload() {
        let msg = verdict(3, 1, 42, VerdictCode::Accept, None).unwrap();
        assert_eq!(msg.len(), 32);
        assert_eq!(u16::from_ne_bytes([msg[4], msg[5]]), 0x0301);
        assert_eq!(u16::from_ne_bytes([msg[6], msg[7]]), NLM_F_REQUEST);
        assert_eq!(&msg[24..28], &1u32.to_be_bytes());
        assert_eq!(&msg[28..32], &42u32.to_be_bytes());
    }

    #[test]
    fn test_verdict_with_payload() {
        let msg = verdict(3, 1, 42, VerdictCode::Accept, Some(&b"abcde"[..])).unwrap();
        assert_eq!(msg.len(), 32 + 12);
        assert_eq!(read_u32_ne(&msg), 44);
        assert_eq!(u16::from_ne_bytes([msg[32], msg[33]]), 9);
        assert_eq!(u16::from_ne_bytes([msg[34], msg[35]]), NFQA_PAYLOAD);
        assert_eq!(&msg[36..41], b"abcde");
        assert_eq!(&msg[41..44], &[0, 0, 0]);
    }

    #[test]
    fn test_verdict_payload_limit() {
        let largest = vec![0u8; MAX_VERDICT_PAYLOAD_LEN];
        let msg = verdict(1, 0, 5, VerdictCode::Accept, Some(largest.as_slice())).unwrap();
        assert_eq!(u16::from_ne_bytes([msg[32], msg[33]]), u16::MAX);
        assert_eq!(msg.len(), 32 + align(NLA_HDR_LEN + MAX_VERDICT_PAYLOAD_LEN));

        for len in [MAX_VERDICT_PAYLOAD_LEN + 1, 65535, 70_000] {
            let payload = vec![0u8; len];
            assert_eq!(
                verdict(1, 0, 5, VerdictCode::Accept, Some(payload.as_slice())),
                Err(PayloadTooLarge(len))
            );
        }
    }

    #[test]
    fn test_rewritten_packets_fit_verdict() {
        assert_eq!(
            nfmangle_core::MAX_REWRITTEN_PACKET_LEN,
            MAX_VERDICT_PAYLOAD_LEN
        );
    }

    #[test]
    fn test_parse_packet() {
        let data = packet_message(0, 9, Some(0x10), b"\x45\x00payload");
        let parsed = parse_datagram(&data);
        assert_eq!(
            parsed,
            vec![Incoming::Packet(QueueMessage {
                id: 9,
                hw_protocol: 0x0800,
                hook: 0,
                mark: Some(0x10),
                payload: Bytes::from_static(b"\x45\x00payload"),
            })]
        );
    }

    #[test]
    fn test_parse_batched_datagram() {
        let mut data = packet_message(0, 1, None, b"one");
        data.extend(error_message(5, 0));
        data.extend(packet_message(0, 2, None, b"two"));

        let parsed = parse_datagram(&data);
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[0], Incoming::Packet(m) if m.id == 1 && m.mark.is_none()));
        assert_eq!(parsed[1], Incoming::Status { seq: 5, errno: 0 });
        assert!(matches!(&parsed[2], Incoming::Packet(m) if &m.payload[..] == b"two"));
    }

    #[test]
    fn test_parse_error_status() {
        let parsed = parse_datagram(&error_message(4, 16));
        assert_eq!(parsed, vec![Incoming::Status { seq: 4, errno: 16 }]);
    }

    #[test]
    fn test_parse_truncated() {
        let data = packet_message(0, 1, None, b"payload");
        assert_eq!(
            parse_datagram(&data[..data.len() - 4]),
            vec![Incoming::Malformed(ParseError("truncated netlink message"))]
        );
        assert!(parse_datagram(&[]).is_empty());
    }

    fn headerless_packet_message() -> Vec<u8> {
        MessageBuilder::new(NFQNL_MSG_PACKET, 0, 0, 2, 0)
            .attr(NFQA_PAYLOAD, b"x")
            .finish()
    }

    #[test]
    fn test_parse_packet_without_header() {
        assert_eq!(
            parse_datagram(&headerless_packet_message()),
            vec![Incoming::Malformed(ParseError("packet message without header"))]
        );
    }

    #[test]
    fn test_malformed_message_keeps_neighbours() {
        let mut data = packet_message(0, 1, None, b"one");
        data.extend(headerless_packet_message());
        data.extend(packet_message(0, 3, None, b"three"));

        let parsed = parse_datagram(&data);
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[0], Incoming::Packet(m) if m.id == 1));
        assert_eq!(
            parsed[1],
            Incoming::Malformed(ParseError("packet message without header"))
        );
        assert!(matches!(&parsed[2], Incoming::Packet(m) if m.id == 3));
    }

    #[test]
    fn test_truncated_tail_keeps_earlier_packets() {
        let mut data = packet_message(0, 1, None, b"one");
        let second = packet_message(0, 2, None, b"two");
        data.extend_from_slice(&second[..second.len() - 4]);

        let parsed = parse_datagram(&data);
        assert_eq!(parsed.len(), 2);
        assert!(matches!(&parsed[0], Incoming::Packet(m) if m.id == 1));
        assert!(matches!(&parsed[1], Incoming::Malformed(_)));
    }
}
