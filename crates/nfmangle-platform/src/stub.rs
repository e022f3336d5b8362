//! Packet queue stand-in for platforms without NFQUEUE

use crate::error::{PlatformError, Result};
use crate::traits::{AddressFamily, PacketQueue, QueueMessage, QueueParams, VerdictCode};

/// Kernel packet queue (unavailable on this platform)
///
/// Opens successfully so configuration can be checked, then fails at bind.
#[derive(Debug, Default)]
pub struct NetlinkQueue;

impl NetlinkQueue {
    /// Create the stand-in
    pub fn open() -> Result<Self> {
        Ok(Self)
    }

    fn unsupported<T>() -> Result<T> {
        Err(PlatformError::Unsupported(
            "NFQUEUE requires Linux".to_string(),
        ))
    }
}

impl PacketQueue for NetlinkQueue {
    fn unbind(&self, _family: AddressFamily) -> Result<()> {
        Self::unsupported()
    }

    fn bind(&self, _family: AddressFamily) -> Result<()> {
        Self::unsupported()
    }

    fn create_queue(&self, _num: u16, _params: &QueueParams) -> Result<()> {
        Self::unsupported()
    }

    fn recv(&self) -> Result<Option<QueueMessage>> {
        Self::unsupported()
    }

    fn set_verdict(&self, _id: u32, _verdict: VerdictCode) -> Result<()> {
        Self::unsupported()
    }

    fn set_verdict_modified(&self, _id: u32, _verdict: VerdictCode, _data: &[u8]) -> Result<()> {
        Self::unsupported()
    }

    fn destroy_queue(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
