//! Packet verdicts

use bytes::Bytes;
use std::fmt;

/// Disposition returned to the kernel for one queued packet
#[derive(Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the packet through exactly as received
    Accept(Bytes),
    /// Let the packet through with new contents
    AcceptModified(Bytes),
    /// Discard the packet
    Drop,
}

impl Verdict {
    /// Bytes to hand back to the kernel, if any
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Accept(bytes) | Self::AcceptModified(bytes) => Some(bytes),
            Self::Drop => None,
        }
    }

    /// True if the verdict carries rewritten bytes
    pub fn is_modified(&self) -> bool {
        matches!(self, Self::AcceptModified(_))
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept(_) => "accept",
            Self::AcceptModified(_) => "accept-modified",
            Self::Drop => "drop",
        }
    }
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes() {
            Some(bytes) => write!(f, "{}({} bytes)", self.name(), bytes.len()),
            None => f.write_str(self.name()),
        }
    }
}
