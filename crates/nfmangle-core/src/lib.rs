//! # nfmangle Core
//!
//! Platform-independent core of the nfmangle packet-mutation engine.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Packet decoding** - Zero-copy IPv4/TCP layer views over raw buffers
//! - **Payload rewriting** - Ordered byte-pattern replacement rules
//! - **Re-serialization** - Length and checksum fix-up for rewritten packets
//! - **Engine** - The per-packet chain that turns a packet into a verdict
//! - **Diagnostics** - Hex dumps and byte diffs of rewritten packets
//! - **Configuration** - TOML configuration with validation
//!
//! ## Example
//!
//! ```rust
//! use nfmangle_core::packet::{PacketBuilder, RawPacket};
//! use nfmangle_core::{Engine, RuleSet, Verdict};
//!
//! let engine = Engine::new(RuleSet::single("magic string", "modified value"));
//!
//! let data = PacketBuilder::tcp_v4()
//!     .src_port(9999)
//!     .dst_port(40000)
//!     .payload(b"GET /magic string HTTP/1.1")
//!     .build();
//!
//! let verdict = engine.process(&RawPacket::new(1, data));
//! assert!(matches!(verdict, Verdict::AcceptModified(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod report;
pub mod rewrite;
pub mod serialize;
pub mod verdict;

// Re-exports for convenience
pub use config::Config;
pub use engine::{Engine, Stats};
pub use error::{Error, Result};
pub use packet::{DecodedPacket, RawPacket};
pub use report::{PacketReport, ReportOptions, ReportSink, TracingReporter};
pub use rewrite::{MatchRule, RewriteResult, RuleSet};
pub use serialize::{reserialize, MAX_REWRITTEN_PACKET_LEN};
pub use verdict::Verdict;
