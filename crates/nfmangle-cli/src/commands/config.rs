//! Config command - configuration management

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use nfmangle_core::config::Config;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default file name written by `config init`
pub const DEFAULT_CONFIG_FILE: &str = "nfmangle.toml";

/// System-wide configuration file
pub const SYSTEM_CONFIG_FILE: &str = "/etc/nfmangle/nfmangle.toml";

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        /// Config file to show (default: search the usual locations)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write a configuration file with the defaults
    Init {
        /// Output file path
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },

    /// Show config file locations
    Paths,
}

/// Execute config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show { file } => show_config(file.as_deref()),
        ConfigAction::Init { path, force } => init_config(&path, force),
        ConfigAction::Validate { file } => validate_config(&file),
        ConfigAction::Paths => {
            show_paths();
            Ok(())
        }
    }
}

/// Load `path`, or the first config file found, or the defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path.map(Path::to_path_buf).or_else(find_config_file) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn show_config(file: Option<&Path>) -> Result<()> {
    let config = load_config(file)?;
    let toml_str = config.to_toml().context("Failed to serialize config")?;
    print!("{toml_str}");
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let toml_str = Config::default()
        .to_toml()
        .context("Failed to serialize config")?;
    let content = format!(
        "# nfmangle configuration\n\
         # Rules are applied in order; encoding is \"text\" or \"hex\"\n\n\
         {toml_str}"
    );

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    info!(path = %path.display(), "Generated config file");
    println!("Configuration file generated: {}", path.display());
    Ok(())
}

fn validate_config(file: &Path) -> Result<()> {
    let config = Config::load(file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("✓ Configuration is valid");
    println!("  Queue: {}", config.queue.num);
    println!("  Workers: {}", config.queue.workers);
    println!("  Rules: {}", config.rules.len());
    println!("  Firewall provisioning: {}", config.firewall.enabled);

    Ok(())
}

fn show_paths() {
    println!("Configuration file search paths:");
    println!();
    for (i, path) in search_paths().iter().enumerate() {
        println!("  {}. {}", i + 1, path.display());
    }
}

fn search_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(DEFAULT_CONFIG_FILE),
        PathBuf::from(SYSTEM_CONFIG_FILE),
    ]
}

fn find_config_file() -> Option<PathBuf> {
    search_paths().into_iter().find(|path| path.exists())
}
