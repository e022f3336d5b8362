//! nfmangle Platform Layer
//!
//! Kernel-facing half of nfmangle: the packet queue binding, exactly-once
//! verdict delivery, the queue session lifecycle and firewall rule
//! provisioning.
//!
//! ## Supported Platforms
//!
//! - **Linux**: NFQUEUE over a raw nfnetlink socket
//! - **Other**: compiles, fails at bind with [`PlatformError::Unsupported`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

mod error;
pub use error::{PlatformError, Result};

// Platform-agnostic queue interface
mod traits;
pub use traits::{AddressFamily, PacketQueue, QueueMessage, QueueParams, VerdictCode};

pub mod firewall;
pub mod netlink;
pub mod session;
pub mod verdict;

pub use firewall::{Firewall, FirewallRule};
pub use session::{QueueSession, QueueState, SessionConfig, SessionStats, StopHandle};
pub use verdict::PendingVerdict;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::NetlinkQueue;

#[cfg(not(target_os = "linux"))]
mod stub;
#[cfg(not(target_os = "linux"))]
pub use stub::NetlinkQueue;
