//! Platform-specific errors

use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Packet queues are not available on this platform or kernel
    #[error("Packet queue not supported: {0}")]
    Unsupported(String),

    /// The kernel refused the protocol family
    #[error("Protocol family {family} not supported by the packet queue")]
    FamilyUnsupported {
        /// Address family number
        family: u16,
    },

    /// Permission denied
    #[error("Permission denied: {0} (CAP_NET_ADMIN required)")]
    PermissionDenied(String),

    /// Another process is bound to the queue
    #[error("Queue {queue} is already in use by another process")]
    QueueInUse {
        /// Queue number
        queue: u16,
    },

    /// Netlink request rejected with an errno
    #[error("Netlink {operation} failed: {source}")]
    Netlink {
        /// Request that failed
        operation: &'static str,
        /// Kernel error
        #[source]
        source: std::io::Error,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current state name
        state: String,
    },

    /// Receiving from the queue failed
    #[error("Receive error: {0}")]
    Receive(String),

    /// Delivering a verdict failed
    #[error("Verdict for packet {id} failed: {message}")]
    Verdict {
        /// Kernel message id
        id: u32,
        /// Error message
        message: String,
    },

    /// Replacement packet too large to send back; nothing was sent
    #[error("Replacement for packet {id} is {len} bytes, too large for a verdict")]
    PayloadTooLarge {
        /// Kernel message id
        id: u32,
        /// Replacement length
        len: usize,
    },

    /// Firewall rule provisioning failed
    #[error("Firewall error: {0}")]
    Firewall(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    /// Map a kernel errno from a netlink request to a descriptive error
    pub fn from_errno(operation: &'static str, errno: i32, queue: u16, family: u16) -> Self {
        const EPERM: i32 = 1;
        const EBUSY: i32 = 16;
        const EACCES: i32 = 13;
        const EPROTONOSUPPORT: i32 = 93;
        const EAFNOSUPPORT: i32 = 97;

        match errno {
            EPERM | EACCES => Self::PermissionDenied(operation.to_string()),
            EBUSY => Self::QueueInUse { queue },
            EAFNOSUPPORT | EPROTONOSUPPORT => Self::FamilyUnsupported { family },
            _ => Self::Netlink {
                operation,
                source: std::io::Error::from_raw_os_error(errno),
            },
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert!(matches!(
            PlatformError::from_errno("bind", 1, 0, 2),
            PlatformError::PermissionDenied(_)
        ));
        assert!(matches!(
            PlatformError::from_errno("bind", 16, 7, 2),
            PlatformError::QueueInUse { queue: 7 }
        ));
        assert!(matches!(
            PlatformError::from_errno("pf_bind", 97, 0, 10),
            PlatformError::FamilyUnsupported { family: 10 }
        ));
        assert!(matches!(
            PlatformError::from_errno("params", 22, 0, 2),
            PlatformError::Netlink { operation: "params", .. }
        ));
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::invalid_state("run", "Unbound");
        assert_eq!(err.to_string(), "Cannot run while Unbound");

        let err = PlatformError::QueueInUse { queue: 3 };
        assert!(err.to_string().contains("Queue 3"));
    }
}
