//! Platform-agnostic packet queue interface
//!
//! A queue hands packets diverted by the firewall to user space and takes
//! back exactly one verdict per packet. [`crate::QueueSession`] drives any
//! implementation through its lifecycle.

use crate::Result;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Kernel packet queue
///
/// Methods take `&self` so worker threads can receive and issue verdicts
/// concurrently on one queue. `close` must not race with other calls.
#[cfg_attr(test, mockall::automock)]
pub trait PacketQueue: Send + Sync {
    /// Release any earlier binding of the protocol family
    fn unbind(&self, family: AddressFamily) -> Result<()>;

    /// Bind the protocol family to the queue subsystem
    fn bind(&self, family: AddressFamily) -> Result<()>;

    /// Attach to queue `num` and apply the copy parameters
    fn create_queue(&self, num: u16, params: &QueueParams) -> Result<()>;

    /// Wait for the next packet
    ///
    /// Returns `Ok(None)` when the poll interval elapses without a packet,
    /// so callers can check for a stop request.
    fn recv(&self) -> Result<Option<QueueMessage>>;

    /// Issue a verdict, keeping the packet bytes the kernel already holds
    fn set_verdict(&self, id: u32, verdict: VerdictCode) -> Result<()>;

    /// Issue a verdict with replacement packet bytes
    fn set_verdict_modified(&self, id: u32, verdict: VerdictCode, data: &[u8]) -> Result<()>;

    /// Detach from the queue
    fn destroy_queue(&self) -> Result<()>;

    /// Release the underlying handle
    fn close(&self) -> Result<()>;
}

/// Protocol family bound to the queue subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4
    Inet,
}

impl AddressFamily {
    /// Kernel `AF_*` number
    pub fn raw(self) -> u16 {
        match self {
            Self::Inet => 2,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet => write!(f, "AF_INET"),
        }
    }
}

/// Queue copy parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueParams {
    /// Bytes of each packet copied to user space
    pub copy_range: u32,
    /// Maximum packets the kernel holds waiting for a verdict
    pub max_len: u32,
    /// Longest a `recv` call blocks
    pub poll_interval: Duration,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            copy_range: 65535,
            max_len: 1024,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl From<&nfmangle_core::config::QueueConfig> for QueueParams {
    fn from(config: &nfmangle_core::config::QueueConfig) -> Self {
        Self {
            copy_range: config.copy_range,
            max_len: config.max_len,
            poll_interval: config.poll_interval(),
        }
    }
}

/// A packet delivered by the kernel, awaiting its verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Kernel-assigned id, echoed back in the verdict
    pub id: u32,
    /// Link-layer protocol (EtherType)
    pub hw_protocol: u16,
    /// Netfilter hook the packet was queued from
    pub hook: u8,
    /// Firewall mark, if set
    pub mark: Option<u32>,
    /// Packet bytes starting at the network header
    pub payload: Bytes,
}

/// Verdict sent to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VerdictCode {
    /// Discard the packet
    Drop = 0,
    /// Let the packet continue
    Accept = 1,
}

impl VerdictCode {
    /// Wire value
    pub fn raw(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfmangle_core::config::QueueConfig;

    #[test]
    fn test_family_numbers() {
        assert_eq!(AddressFamily::Inet.raw(), 2);
        assert_eq!(AddressFamily::Inet.to_string(), "AF_INET");
    }

    #[test]
    fn test_verdict_codes() {
        assert_eq!(VerdictCode::Drop.raw(), 0);
        assert_eq!(VerdictCode::Accept.raw(), 1);
    }

    #[test]
    fn test_params_from_config() {
        let config = QueueConfig {
            copy_range: 1500,
            poll_interval_ms: 50,
            ..QueueConfig::default()
        };
        let params = QueueParams::from(&config);
        assert_eq!(params.copy_range, 1500);
        assert_eq!(params.max_len, 1024);
        assert_eq!(params.poll_interval, Duration::from_millis(50));
    }
}
