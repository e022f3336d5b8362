//! iptables rule provisioning
//!
//! Installs the rule that diverts traffic into the queue before the session
//! starts and removes exactly that rule afterwards.

use crate::error::{PlatformError, Result};
use nfmangle_core::config::FirewallConfig;
use std::ffi::OsString;
use std::process::Command;
use tracing::{debug, info, warn};

/// Default firewall tool
pub const IPTABLES: &str = "iptables";

/// What to do with a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Append to the chain (`-A`)
    Append,
    /// Delete the matching rule (`-D`)
    Delete,
}

impl RuleAction {
    fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

/// An NFQUEUE redirect rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    table: String,
    chain: String,
    protocol: String,
    source_port: Option<u16>,
    destination_port: Option<u16>,
    queue_num: u16,
    queue_bypass: bool,
}

impl FirewallRule {
    /// `raw PREROUTING -p tcp -j NFQUEUE --queue-num <queue_num>`
    pub fn new(queue_num: u16) -> Self {
        Self {
            table: "raw".to_string(),
            chain: "PREROUTING".to_string(),
            protocol: "tcp".to_string(),
            source_port: None,
            destination_port: None,
            queue_num,
            queue_bypass: false,
        }
    }

    /// Rule described by the `[firewall]` section
    pub fn from_config(config: &FirewallConfig, queue_num: u16) -> Self {
        Self::new(queue_num)
            .table(&config.table)
            .chain(&config.chain)
            .protocol(&config.protocol)
            .source_port(config.source_port)
            .destination_port(config.destination_port)
            .queue_bypass(config.queue_bypass)
    }

    /// Set the table
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Set the chain
    pub fn chain(mut self, chain: &str) -> Self {
        self.chain = chain.to_string();
        self
    }

    /// Set the protocol match
    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Match a source port; `None` or 0 matches any port
    pub fn source_port(mut self, port: Option<u16>) -> Self {
        self.source_port = port.filter(|&p| p != 0);
        self
    }

    /// Match a destination port; `None` or 0 matches any port
    pub fn destination_port(mut self, port: Option<u16>) -> Self {
        self.destination_port = port.filter(|&p| p != 0);
        self
    }

    /// Accept packets while nothing is bound to the queue
    pub fn queue_bypass(mut self, bypass: bool) -> Self {
        self.queue_bypass = bypass;
        self
    }

    /// Queue number the rule targets
    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    /// Argument vector for `iptables`
    pub fn args(&self, action: RuleAction) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.clone(),
            action.flag().to_string(),
            self.chain.clone(),
        ];
        if !self.protocol.is_empty() {
            args.extend(["-p".to_string(), self.protocol.clone()]);
        }
        if let Some(port) = self.source_port {
            args.extend(["--source-port".to_string(), port.to_string()]);
        }
        if let Some(port) = self.destination_port {
            args.extend(["--destination-port".to_string(), port.to_string()]);
        }
        args.extend([
            "-j".to_string(),
            "NFQUEUE".to_string(),
            "--queue-num".to_string(),
            self.queue_num.to_string(),
        ]);
        if self.queue_bypass {
            args.push("--queue-bypass".to_string());
        }
        args
    }
}

impl std::fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args(RuleAction::Append).join(" "))
    }
}

/// Installs and removes one [`FirewallRule`]
#[derive(Debug)]
pub struct Firewall {
    program: OsString,
    rule: FirewallRule,
    installed: bool,
}

impl Firewall {
    /// Manage `rule` with `iptables`
    pub fn new(rule: FirewallRule) -> Self {
        Self::with_program(IPTABLES, rule)
    }

    /// Manage `rule` with another iptables-compatible tool
    pub fn with_program(program: impl Into<OsString>, rule: FirewallRule) -> Self {
        Self {
            program: program.into(),
            rule,
            installed: false,
        }
    }

    /// The managed rule
    pub fn rule(&self) -> &FirewallRule {
        &self.rule
    }

    /// Whether [`install`](Self::install) succeeded and the rule was not
    /// removed since
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Append the rule
    pub fn install(&mut self) -> Result<()> {
        if self.installed {
            return Ok(());
        }
        self.exec(RuleAction::Append)?;
        self.installed = true;
        info!(rule = %self.rule, "Firewall rule installed");
        Ok(())
    }

    /// Delete the rule, if this instance installed it
    pub fn remove(&mut self) -> Result<()> {
        if !self.installed {
            debug!("Firewall rule not installed, nothing to remove");
            return Ok(());
        }
        self.exec(RuleAction::Delete)?;
        self.installed = false;
        info!(rule = %self.rule, "Firewall rule removed");
        Ok(())
    }

    fn exec(&self, action: RuleAction) -> Result<()> {
        let args = self.rule.args(action);
        debug!(program = ?self.program, ?args, "Running firewall command");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                PlatformError::Firewall(format!(
                    "failed to run {}: {e}",
                    self.program.to_string_lossy()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                ?action,
                status = %output.status,
                stderr = %stderr.trim(),
                "Firewall command failed"
            );
            return Err(PlatformError::Firewall(format!(
                "{} {} exited with {}: {}",
                self.program.to_string_lossy(),
                action.flag(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
