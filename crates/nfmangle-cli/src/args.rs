//! Command-line argument parsing

use crate::commands::run::RunArgs;
use crate::commands::Command;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// nfmangle - inline NFQUEUE packet rewriter
///
/// Receives packets diverted by a netfilter NFQUEUE rule, replaces byte
/// patterns in their TCP payload and hands them back with fixed lengths
/// and checksums. Runs the packet loop when no subcommand is given.
#[derive(Parser, Debug)]
#[command(name = "nfmangle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default `run` command
    #[command(flatten)]
    pub run: RunArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format for logs
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}
