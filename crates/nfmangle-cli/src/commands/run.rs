//! Run command - the packet loop

use anyhow::{Context, Result};
use clap::Args;
use nfmangle_core::config::{Config, RuleConfig};
use nfmangle_core::Engine;
use nfmangle_platform::{
    Firewall, FirewallRule, NetlinkQueue, PacketQueue, QueueSession, SessionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::commands::config::load_config;
use crate::report::reporters;

/// Run command arguments
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Queue number to bind
    #[arg(long, value_name = "N")]
    pub queue_num: Option<u16>,

    /// Replace the configured rules with this pattern
    #[arg(long, value_name = "STR", requires = "replacement")]
    pub pattern: Option<String>,

    /// Replacement for --pattern
    #[arg(long, value_name = "STR", requires = "pattern")]
    pub replacement: Option<String>,

    /// Worker threads
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Install the iptables rule at startup and remove it on exit
    #[arg(long)]
    pub provision_firewall: bool,

    /// Source port matched by the provisioned rule (0 matches any)
    #[arg(long, value_name = "PORT")]
    pub source_port: Option<u16>,

    /// Do not print packet hex dumps
    #[arg(long)]
    pub no_hexdump: bool,

    /// Do not print diffs of rewritten packets
    #[arg(long)]
    pub no_diff: bool,

    /// Do not color diff output
    #[arg(long)]
    pub no_color: bool,

    /// Do not print packet reports to stdout
    #[arg(long)]
    pub no_report: bool,

    /// Emit packet reports as log events
    #[arg(long)]
    pub log_reports: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(num) = self.queue_num {
            config.queue.num = num;
        }
        if let (Some(pattern), Some(replacement)) = (&self.pattern, &self.replacement) {
            config.rules = vec![RuleConfig::text(pattern.as_str(), replacement.as_str())];
        }
        if let Some(workers) = self.workers {
            config.queue.workers = workers;
        }
        if self.provision_firewall {
            config.firewall.enabled = true;
        }
        if let Some(port) = self.source_port {
            config.firewall.source_port = Some(port);
        }
        if self.no_hexdump {
            config.diagnostics.hexdump = false;
        }
        if self.no_diff {
            config.diagnostics.diff = false;
        }
        if self.no_color {
            config.diagnostics.color = false;
        }
        if self.no_report {
            config.diagnostics.console = false;
        }
        if self.log_reports {
            config.diagnostics.log = true;
        }
    }
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let rules = config.rule_set().context("Invalid rewrite rules")?;
    info!(
        queue = config.queue.num,
        workers = config.queue.workers,
        rules = rules.len(),
        firewall = config.firewall.enabled,
        "Loaded configuration"
    );

    if args.dry_run {
        info!("Dry run, not binding the queue");
        println!("Configuration is valid");
        return Ok(());
    }

    colored::control::set_override(config.diagnostics.color);
    let sinks = reporters(&config.diagnostics);
    let mut engine = Engine::new(rules);
    if !sinks.is_empty() {
        engine = engine.with_reporter(Arc::new(sinks));
    }

    let queue = NetlinkQueue::open().context("Failed to open the netfilter queue socket")?;
    let session = QueueSession::new(queue, SessionConfig::from(&config.queue));

    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        if stop.request_stop() {
            info!("Received interrupt signal, shutting down...");
        }
    })
    .context("Failed to set signal handler")?;

    let mut firewall = config.firewall.enabled.then(|| {
        Firewall::new(FirewallRule::from_config(
            &config.firewall,
            config.queue.num,
        ))
    });

    let result = serve(&session, &engine, firewall.as_mut());

    if let Some(firewall) = firewall.as_mut() {
        if let Err(e) = firewall.remove() {
            warn!(error = %e, "Failed to remove firewall rule");
        }
    }
    if let Err(e) = session.shutdown() {
        warn!(error = %e, "Queue shutdown incomplete");
    }

    let stats = engine.stats();
    let session_stats = session.stats();
    info!(
        processed = stats.packets_processed,
        rewritten = stats.packets_rewritten,
        unchanged = stats.packets_unchanged,
        decode_failures = stats.decode_failures,
        serialize_failures = stats.serialize_failures,
        verdict_failures = session_stats.verdict_failures,
        "nfmangle stopped"
    );

    result
}

fn serve<Q: PacketQueue>(
    session: &QueueSession<Q>,
    engine: &Engine,
    firewall: Option<&mut Firewall>,
) -> Result<()> {
    let queue_num = session.config().queue_num;
    session
        .open()
        .with_context(|| format!("Failed to bind NFQUEUE {queue_num}"))?;

    if let Some(firewall) = firewall {
        firewall
            .install()
            .with_context(|| format!("Failed to install firewall rule: {}", firewall.rule()))?;
    }

    session.run(engine).context("Packet loop failed")
}
