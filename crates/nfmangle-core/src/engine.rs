//! Packet mutation engine
//!
//! Runs the per-packet chain: decode, match and rewrite, re-serialize, then
//! decide the verdict. Every path yields a verdict; failures degrade to
//! accepting the original bytes.

use crate::packet::{DecodedPacket, RawPacket};
use crate::report::{PacketReport, ReportSink};
use crate::rewrite::{RewriteResult, RuleSet};
use crate::serialize::reserialize;
use crate::verdict::Verdict;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Snapshot of engine counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Total packets processed
    pub packets_processed: u64,
    /// Packets accepted with rewritten bytes
    pub packets_rewritten: u64,
    /// Packets accepted untouched
    pub packets_unchanged: u64,
    /// Packets the decoder rejected
    pub decode_failures: u64,
    /// Packets without a TCP layer
    pub no_transport: u64,
    /// Rewrites that could not be re-serialized
    pub serialize_failures: u64,
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes handed back
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    packets_processed: AtomicU64,
    packets_rewritten: AtomicU64,
    packets_unchanged: AtomicU64,
    decode_failures: AtomicU64,
    no_transport: AtomicU64,
    serialize_failures: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Stats {
        Stats {
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            packets_rewritten: self.packets_rewritten.load(Ordering::Relaxed),
            packets_unchanged: self.packets_unchanged.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            no_transport: self.no_transport.load(Ordering::Relaxed),
            serialize_failures: self.serialize_failures.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// The per-packet callback chain
///
/// Shared by reference between worker threads. The active rule set can be
/// swapped while packets are in flight; each packet sees one consistent
/// snapshot.
pub struct Engine {
    rules: RwLock<Arc<RuleSet>>,
    reporter: Option<Arc<dyn ReportSink>>,
    counters: Counters,
}

impl Engine {
    /// Create an engine with the given rules and no reporter
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            reporter: None,
            counters: Counters::default(),
        }
    }

    /// Attach a diagnostic reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Current rule set
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read())
    }

    /// Swap the active rule set
    ///
    /// Packets already past their snapshot finish with the old rules.
    pub fn replace_rules(&self, rules: RuleSet) {
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        debug!(rules = count, "Rule set replaced");
    }

    /// Counter snapshot
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Decide the verdict for one delivered packet
    ///
    /// `Accept` always carries the delivered bytes unchanged.
    #[instrument(level = "trace", skip_all, fields(id = packet.id(), len = packet.len()))]
    pub fn process(&self, packet: &RawPacket) -> Verdict {
        Counters::bump(&self.counters.packets_processed);
        self.counters
            .bytes_in
            .fetch_add(packet.len() as u64, Ordering::Relaxed);

        let verdict = match packet.decode() {
            Ok(decoded) => {
                let verdict = self.mutate(packet, &decoded);
                self.report(packet, decoded.ports(), &verdict);
                verdict
            }
            Err(err) => {
                Counters::bump(&self.counters.decode_failures);
                debug!(id = packet.id(), error = %err, "Decode failed, accepting as-is");
                let verdict = Verdict::Accept(packet.bytes());
                self.report(packet, None, &verdict);
                verdict
            }
        };

        match &verdict {
            Verdict::AcceptModified(bytes) => {
                Counters::bump(&self.counters.packets_rewritten);
                self.counters
                    .bytes_out
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Verdict::Accept(bytes) => {
                Counters::bump(&self.counters.packets_unchanged);
                self.counters
                    .bytes_out
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Verdict::Drop => {}
        }

        trace!(verdict = verdict.name(), "Verdict decided");
        verdict
    }

    fn mutate(&self, packet: &RawPacket, decoded: &DecodedPacket<'_>) -> Verdict {
        if decoded.transport().is_none() {
            Counters::bump(&self.counters.no_transport);
            trace!(id = packet.id(), "No transport layer");
            return Verdict::Accept(packet.bytes());
        }

        let rules = self.rules();
        match rules.apply(decoded.payload()) {
            RewriteResult::Unchanged => Verdict::Accept(packet.bytes()),
            RewriteResult::Rewritten(payload) => match reserialize(decoded, &payload) {
                Ok(bytes) => Verdict::AcceptModified(bytes),
                Err(err) => {
                    Counters::bump(&self.counters.serialize_failures);
                    warn!(
                        id = packet.id(),
                        error = %err,
                        "Re-serialization failed, accepting original"
                    );
                    Verdict::Accept(packet.bytes())
                }
            },
        }
    }

    fn report(&self, packet: &RawPacket, ports: Option<(u16, u16)>, verdict: &Verdict) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let rewritten = match verdict {
            Verdict::AcceptModified(bytes) => Some(&bytes[..]),
            Verdict::Accept(_) | Verdict::Drop => None,
        };
        reporter.report(&PacketReport {
            id: packet.id(),
            ports,
            original: packet.as_bytes(),
            rewritten,
        });
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuleSet::new(vec![crate::rewrite::MatchRule::default()]))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.rules.read().len())
            .field("reporter", &self.reporter.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ip_proto, PacketBuilder};
    use parking_lot::Mutex;

    fn tcp_packet(payload: &[u8]) -> Vec<u8> {
        PacketBuilder::tcp_v4()
            .src_ip([127, 0, 0, 1])
            .dst_ip([127, 0, 0, 1])
            .src_port(9999)
            .dst_port(51000)
            .payload(payload)
            .build()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u32, Option<(u16, u16)>, bool)>>,
    }

    impl ReportSink for Recorder {
        fn report(&self, report: &PacketReport<'_>) {
            self.seen
                .lock()
                .push((report.id, report.ports, report.rewritten.is_some()));
        }
    }

    #[test]
    fn test_rewrite_verdict() {
        let engine = Engine::default();
        let raw = RawPacket::new(1, tcp_packet(b"GET /magic string HTTP/1.1"));

        let verdict = engine.process(&raw);
        let Verdict::AcceptModified(bytes) = &verdict else {
            panic!("expected modified verdict, got {verdict:?}");
        };
        let decoded = DecodedPacket::decode(bytes).unwrap();
        assert_eq!(decoded.payload(), Some(&b"GET /modified value HTTP/1.1"[..]));
        assert_eq!(engine.stats().packets_rewritten, 1);
    }

    #[test]
    fn test_unchanged_accepts_original() {
        let engine = Engine::default();
        let raw = RawPacket::new(2, tcp_packet(b"nothing to see"));
        assert_eq!(engine.process(&raw), Verdict::Accept(raw.bytes()));

        let stats = engine.stats();
        assert_eq!(stats.packets_unchanged, 1);
        assert_eq!(stats.bytes_in, stats.bytes_out);
    }

    #[test]
    fn test_decode_failure_accepts_original() {
        let engine = Engine::default();
        let raw = RawPacket::new(3, vec![0x45, 0x00, 0x00]);
        assert_eq!(engine.process(&raw), Verdict::Accept(raw.bytes()));
        assert_eq!(engine.stats().decode_failures, 1);
    }

    #[test]
    fn test_non_tcp_accepts_original() {
        let engine = Engine::default();
        let raw = RawPacket::new(
            4,
            PacketBuilder::ipv4(ip_proto::UDP).payload(b"magic string").build(),
        );
        assert_eq!(engine.process(&raw), Verdict::Accept(raw.bytes()));
        assert_eq!(engine.stats().no_transport, 1);
    }

    #[test]
    fn test_reporter_sees_every_packet() {
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::default().with_reporter(recorder.clone());

        engine.process(&RawPacket::new(10, tcp_packet(b"magic string")));
        engine.process(&RawPacket::new(11, tcp_packet(b"plain")));
        engine.process(&RawPacket::new(12, vec![0u8; 4]));

        let seen = recorder.seen.lock();
        assert_eq!(
            *seen,
            vec![
                (10, Some((9999, 51000)), true),
                (11, Some((9999, 51000)), false),
                (12, None, false),
            ]
        );
    }

    #[test]
    fn test_replace_rules() {
        let engine = Engine::default();
        let raw = RawPacket::new(5, tcp_packet(b"hello"));
        assert!(!engine.process(&raw).is_modified());

        engine.replace_rules(RuleSet::single("hello", "howdy"));
        assert!(engine.process(&raw).is_modified());
        assert_eq!(engine.rules().rules()[0].pattern(), b"hello");
    }

    #[test]
    fn test_serialize_failure_accepts_original() {
        // Growing a near-maximal packet past 65535 bytes
        let engine = Engine::new(RuleSet::single("a", "aa"));
        let raw = RawPacket::new(6, tcp_packet(&vec![b'a'; 40_000]));
        assert_eq!(engine.process(&raw), Verdict::Accept(raw.bytes()));
        assert_eq!(engine.stats().serialize_failures, 1);
    }
}
