//! Per-packet diagnostics
//!
//! The engine hands a [`PacketReport`] to a [`ReportSink`] after deciding
//! each verdict. Sinks only observe: nothing they do feeds back into the
//! verdict.

mod diff;
mod hexdump;

pub use diff::{diff, diff_with_limit, render_pretty, DiffSpan, DEFAULT_MAX_EDITS};
pub use hexdump::hexdump;

use std::fmt::Write;
use tracing::{debug, trace};

/// Marker printed for packets that went through untouched
pub const UNCHANGED_MARKER: &str = "-- ";

/// What the engine saw and did for one packet
#[derive(Debug, Clone, Copy)]
pub struct PacketReport<'a> {
    /// Kernel message id
    pub id: u32,
    /// Source and destination port, when a transport layer was decoded
    pub ports: Option<(u16, u16)>,
    /// Bytes as delivered
    pub original: &'a [u8],
    /// Bytes handed back, when the packet was rewritten
    pub rewritten: Option<&'a [u8]>,
}

impl PacketReport<'_> {
    /// Render the report as console text
    ///
    /// Port line (only with a transport layer), id line, optional hex dump,
    /// then either the colored diff of the two hex dumps or the
    /// [`UNCHANGED_MARKER`].
    pub fn render(&self, options: ReportOptions) -> String {
        let mut out = String::new();
        if let Some((src, dst)) = self.ports {
            let _ = writeln!(out, "From src port {src} to dst port {dst}");
        }
        let _ = writeln!(out, "  id: {}", self.id);

        let original_dump = hexdump(self.original);
        if options.hexdump {
            let _ = writeln!(out, "{original_dump}");
        }

        match self.rewritten {
            Some(rewritten) => {
                if options.diff {
                    let spans = diff(original_dump.as_bytes(), hexdump(rewritten).as_bytes());
                    let _ = writeln!(out, "{}", render_pretty(&spans));
                }
            }
            None => {
                let _ = writeln!(out, "{UNCHANGED_MARKER}");
            }
        }
        out
    }
}

/// Which parts of a report to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Hex dump of the original bytes
    pub hexdump: bool,
    /// Diff between original and rewritten hex dumps
    pub diff: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            hexdump: true,
            diff: true,
        }
    }
}

/// Receiver of per-packet reports
///
/// Called from worker threads, possibly concurrently.
pub trait ReportSink: Send + Sync {
    /// Observe one packet
    fn report(&self, report: &PacketReport<'_>);
}

impl ReportSink for Vec<Box<dyn ReportSink>> {
    fn report(&self, report: &PacketReport<'_>) {
        for sink in self {
            sink.report(report);
        }
    }
}

/// Emits reports as `tracing` events
///
/// A one-line summary at `debug`, dumps and diffs at `trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter {
    options: ReportOptions,
}

impl TracingReporter {
    /// Create a reporter
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }
}

impl ReportSink for TracingReporter {
    fn report(&self, report: &PacketReport<'_>) {
        let (src_port, dst_port) = report.ports.unzip();
        debug!(
            id = report.id,
            src_port,
            dst_port,
            len = report.original.len(),
            new_len = report.rewritten.map(<[u8]>::len),
            rewritten = report.rewritten.is_some(),
            "Packet"
        );

        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        if self.options.hexdump {
            trace!(id = report.id, "\n{}", hexdump(report.original));
        }
        if let (true, Some(rewritten)) = (self.options.diff, report.rewritten) {
            let spans = diff(
                hexdump(report.original).as_bytes(),
                hexdump(rewritten).as_bytes(),
            );
            let changed: usize = spans
                .iter()
                .filter(|s| s.is_change())
                .map(|s| s.bytes().len())
                .sum();
            trace!(id = report.id, changed, "\n{}", render_pretty(&spans));
        }
    }
}
