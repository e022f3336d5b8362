//! CLI commands

pub mod config;
pub mod run;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the packet loop (default)
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}
