//! nfmangle CLI
//!
//! Command-line interface for the inline NFQUEUE packet rewriter.

mod args;
mod commands;
mod logging;
mod report;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let _log_guard = logging::init(&args)?;

    // Run the main logic
    let result = run(args);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Some(commands::Command::Run(run_args)) => commands::run::execute(run_args),
        Some(commands::Command::Config(config_args)) => commands::config::execute(config_args),
        None => commands::run::execute(args.run),
    }
}
