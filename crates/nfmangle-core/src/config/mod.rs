//! Configuration management for nfmangle
//!
//! Strongly-typed configuration loaded from TOML. Every section falls back
//! to its defaults, so an empty file is a valid configuration.

mod rules;

pub use rules::{Encoding, RuleConfig};

use crate::error::{Error, Result};
use crate::report::ReportOptions;
use crate::rewrite::RuleSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kernel queue settings
    pub queue: QueueConfig,

    /// Rewrite rules, applied in order
    pub rules: Vec<RuleConfig>,

    /// Firewall rule provisioning
    pub firewall: FirewallConfig,

    /// Per-packet diagnostic output
    pub diagnostics: DiagnosticsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            rules: vec![RuleConfig::default()],
            firewall: FirewallConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ConfigNotFound {
                path: path.display().to_string(),
            },
            _ => Error::Io(e),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.workers == 0 {
            return Err(Error::config_value("queue.workers", "Must be at least 1"));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(Error::config_value(
                "queue.poll_interval_ms",
                "Must be greater than 0",
            ));
        }
        if !(1..=65535).contains(&self.queue.copy_range) {
            return Err(Error::config_value(
                "queue.copy_range",
                "Must be between 1 and 65535",
            ));
        }

        // Decoding catches empty patterns and bad hex
        self.rule_set()?;

        if self.firewall.enabled {
            if self.firewall.table.trim().is_empty() {
                return Err(Error::config_value("firewall.table", "Must not be empty"));
            }
            if self.firewall.chain.trim().is_empty() {
                return Err(Error::config_value("firewall.chain", "Must not be empty"));
            }
        }

        Ok(())
    }

    /// Decode the configured rules
    pub fn rule_set(&self) -> Result<RuleSet> {
        let rules = self
            .rules
            .iter()
            .map(RuleConfig::to_rule)
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleSet::new(rules))
    }
}

/// Kernel queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue number the firewall rule sends packets to
    pub num: u16,
    /// Bytes of each packet copied to user space
    pub copy_range: u32,
    /// Maximum packets the kernel holds waiting for a verdict
    pub max_len: u32,
    /// Worker threads receiving and issuing verdicts
    pub workers: usize,
    /// How often idle workers check for a stop request
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num: 0,
            copy_range: 65535,
            max_len: 1024,
            workers: 1,
            poll_interval_ms: 200,
        }
    }
}

/// Firewall rule provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Install the rule at startup and remove it on shutdown
    pub enabled: bool,
    /// iptables table
    pub table: String,
    /// iptables chain
    pub chain: String,
    /// Protocol match
    pub protocol: String,
    /// Source port match (0 matches any port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u16>,
    /// Destination port match (0 matches any port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
    /// Let packets through while no program is bound to the queue
    pub queue_bypass: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table: "raw".to_string(),
            chain: "PREROUTING".to_string(),
            protocol: "tcp".to_string(),
            source_port: Some(9999),
            destination_port: None,
            queue_bypass: false,
        }
    }
}

/// Per-packet diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Write reports to standard output
    pub console: bool,
    /// Emit reports as log events
    pub log: bool,
    /// Print a hex dump of every packet
    pub hexdump: bool,
    /// Print a diff for every rewritten packet
    pub diff: bool,
    /// Color the diff output
    pub color: bool,
}

impl DiagnosticsConfig {
    /// Which report parts to render
    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            hexdump: self.hexdump,
            diff: self.diff,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            console: true,
            log: false,
            hexdump: true,
            diff: true,
            color: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========== Default Configuration Tests ===========

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue.num, 0);
        assert_eq!(config.queue.workers, 1);
        assert_eq!(config.rules.len(), 1);
        assert!(!config.firewall.enabled);
        assert_eq!(config.firewall.source_port, Some(9999));
        assert!(config.diagnostics.hexdump);
        assert!(config.diagnostics.console);
        assert!(!config.diagnostics.log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_rule_set() {
        let rules = Config::default().rule_set().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.rules()[0].pattern(), b"magic string");
    }

    // =========== Validation Tests ===========

    #[test]
    fn test_validation_zero_workers() {
        let mut config = Config::default();
        config.queue.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_poll_interval() {
        let mut config = Config::default();
        config.queue.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_copy_range() {
        let mut config = Config::default();
        config.queue.copy_range = 0;
        assert!(config.validate().is_err());

        config.queue.copy_range = 65536;
        assert!(config.validate().is_err());

        config.queue.copy_range = 1500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_pattern() {
        let mut config = Config::default();
        config.rules.push(RuleConfig::text("", "x"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rules.pattern"));
    }

    #[test]
    fn test_validation_firewall_table() {
        let mut config = Config::default();
        config.firewall.table = String::new();
        assert!(config.validate().is_ok()); // Disabled, not checked

        config.firewall.enabled = true;
        assert!(config.validate().is_err());
    }

    // =========== TOML Serialization Tests ===========

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.firewall.destination_port = Some(443);
        config.rules.push(RuleConfig {
            pattern: "cafe".into(),
            replacement: "f00d".into(),
            encoding: Encoding::Hex,
        });

        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_toml_parse_minimal() {
        let toml_content = r#"
[queue]
num = 3
workers = 4

[[rules]]
pattern = "foo"
replacement = "bar"

[[rules]]
pattern = "00ff"
replacement = ""
encoding = "hex"
"#;
        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.queue.num, 3);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.copy_range, 65535);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[1].encoding, Encoding::Hex);

        let rules = config.rule_set().unwrap();
        assert_eq!(rules.rules()[1].pattern(), &[0x00, 0xff]);
    }

    #[test]
    fn test_toml_empty_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_toml_parse_invalid() {
        assert!(Config::from_toml("this is not [valid toml").is_err());
        assert!(Config::from_toml("[queue]\nnum = \"zero\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/nfmangle.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_poll_interval() {
        assert_eq!(
            QueueConfig::default().poll_interval(),
            Duration::from_millis(200)
        );
    }
}
