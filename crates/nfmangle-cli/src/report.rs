//! Packet report sinks

use nfmangle_core::config::DiagnosticsConfig;
use nfmangle_core::report::{PacketReport, ReportOptions, ReportSink, TracingReporter};
use parking_lot::Mutex;
use std::io::{self, Write};

/// Sinks enabled by the diagnostics settings
pub fn reporters(diagnostics: &DiagnosticsConfig) -> Vec<Box<dyn ReportSink>> {
    let options = diagnostics.report_options();
    let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
    if diagnostics.console {
        sinks.push(Box::new(ConsoleReporter::stdout(options)));
    }
    if diagnostics.log {
        sinks.push(Box::new(TracingReporter::new(options)));
    }
    sinks
}

/// Writes each packet report as text
///
/// Reports from concurrent workers are written whole, never interleaved.
pub struct ConsoleReporter<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
    options: ReportOptions,
}

impl ConsoleReporter {
    /// Report to standard output
    pub fn stdout(options: ReportOptions) -> Self {
        Self::new(io::stdout(), options)
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    /// Report to `out`
    pub fn new(out: W, options: ReportOptions) -> Self {
        Self {
            out: Mutex::new(out),
            options,
        }
    }

    /// Take back the writer
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ReportSink for ConsoleReporter<W> {
    fn report(&self, report: &PacketReport<'_>) {
        let text = report.render(self.options);
        let mut out = self.out.lock();
        // A closed stdout must not stop packet processing
        let _ = out.write_all(text.as_bytes()).and_then(|()| out.flush());
    }
}
