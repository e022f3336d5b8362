//! Logging initialization
//!
//! Logs go to stderr so packet reports and `config show` own stdout.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};

/// Default level for the given flags
pub fn level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize logging based on CLI arguments
///
/// The returned guard flushes the log file when dropped; keep it alive
/// for the life of the process.
pub fn init(args: &Args) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level(args.verbose, args.quiet).into())
        .from_env_lossy();

    let (file_writer, guard) = match &args.log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match args.log_format {
        LogFormat::Text => {
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(args.verbose >= 2)
                .with_thread_names(args.verbose >= 3)
                .with_file(args.verbose >= 3)
                .with_line_number(args.verbose >= 3);
            let file = file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w));
            registry.with(console).with(file).try_init()
        }
        LogFormat::Json => {
            let console = fmt::layer().json().with_writer(std::io::stderr);
            let file = file_writer.map(|w| fmt::layer().json().with_writer(w));
            registry.with(console).with(file).try_init()
        }
        LogFormat::Compact => {
            let console = fmt::layer().compact().with_writer(std::io::stderr);
            let file = file_writer.map(|w| fmt::layer().compact().with_ansi(false).with_writer(w));
            registry.with(console).with(file).try_init()
        }
    }
    .context("Failed to initialize logging")?;

    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level() {
        assert_eq!(level(0, false), Level::INFO);
        assert_eq!(level(1, false), Level::DEBUG);
        assert_eq!(level(2, false), Level::TRACE);
        assert_eq!(level(3, true), Level::ERROR);
    }
}
