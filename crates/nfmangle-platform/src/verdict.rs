//! Exactly-once verdict delivery

use crate::error::{PlatformError, Result};
use crate::traits::{PacketQueue, VerdictCode};
use bytes::Bytes;
use nfmangle_core::Verdict;
use tracing::{trace, warn};

/// A delivered packet that still owes the kernel a verdict
///
/// [`issue`](Self::issue) consumes the token. A token dropped without being
/// issued accepts the original packet, so every delivered message gets
/// exactly one verdict, including when a worker unwinds from a panic.
///
/// Under `panic = "abort"`, as in the release profile, no destructor runs.
/// The kernel then drops whatever is still queued when the socket closes.
#[must_use = "dropping a pending verdict accepts the packet unchanged"]
pub struct PendingVerdict<'q, Q: PacketQueue + ?Sized> {
    queue: &'q Q,
    id: u32,
    original: Bytes,
    issued: bool,
}

impl<'q, Q: PacketQueue + ?Sized> PendingVerdict<'q, Q> {
    /// Token for message `id` delivered on `queue`
    pub fn new(queue: &'q Q, id: u32, original: Bytes) -> Self {
        Self {
            queue,
            id,
            original,
            issued: false,
        }
    }

    /// Kernel message id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Bytes as delivered
    pub fn original(&self) -> &Bytes {
        &self.original
    }

    /// Deliver the verdict
    ///
    /// The attempt is made once. A delivery failure is returned but not
    /// retried, not even by `Drop`. A replacement too large to encode is
    /// never sent, so the original is accepted in its place.
    pub fn issue(mut self, verdict: Verdict) -> Result<()> {
        self.issued = true;
        let result = match &verdict {
            Verdict::Accept(_) => self.queue.set_verdict(self.id, VerdictCode::Accept),
            Verdict::AcceptModified(bytes) => {
                match self
                    .queue
                    .set_verdict_modified(self.id, VerdictCode::Accept, bytes)
                {
                    Err(PlatformError::PayloadTooLarge { len, .. }) => {
                        warn!(id = self.id, len, "Replacement too large, accepting original");
                        self.queue.set_verdict(self.id, VerdictCode::Accept)
                    }
                    other => other,
                }
            }
            Verdict::Drop => self.queue.set_verdict(self.id, VerdictCode::Drop),
        };
        trace!(id = self.id, ?verdict, ok = result.is_ok(), "Verdict issued");
        result
    }
}

impl<Q: PacketQueue + ?Sized> Drop for PendingVerdict<'_, Q> {
    fn drop(&mut self) {
        if self.issued {
            return;
        }
        warn!(
            id = self.id,
            len = self.original.len(),
            "Verdict not issued, accepting original"
        );
        if let Err(e) = self.queue.set_verdict(self.id, VerdictCode::Accept) {
            warn!(id = self.id, error = %e, "Fallback verdict failed");
        }
    }
}

impl<Q: PacketQueue + ?Sized> std::fmt::Debug for PendingVerdict<'_, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingVerdict")
            .field("id", &self.id)
            .field("len", &self.original.len())
            .field("issued", &self.issued)
            .finish()
    }
}
