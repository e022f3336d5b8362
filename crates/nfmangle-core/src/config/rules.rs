//! Rewrite rule configuration

use crate::error::{Error, Result};
use crate::rewrite::{MatchRule, DEFAULT_PATTERN, DEFAULT_REPLACEMENT};
use serde::{Deserialize, Serialize};

/// How the pattern and replacement strings are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Literal UTF-8 text
    #[default]
    Text,
    /// Hex digits, e.g. `"deadbeef"`
    Hex,
}

/// One `[[rules]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Bytes to search for
    pub pattern: String,
    /// Bytes to substitute
    pub replacement: String,
    /// Encoding of both strings
    #[serde(default)]
    pub encoding: Encoding,
}

impl RuleConfig {
    /// A text rule
    pub fn text(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            encoding: Encoding::Text,
        }
    }

    /// Decode into a [`MatchRule`]
    pub fn to_rule(&self) -> Result<MatchRule> {
        let (pattern, replacement) = match self.encoding {
            Encoding::Text => (
                self.pattern.as_bytes().to_vec(),
                self.replacement.as_bytes().to_vec(),
            ),
            Encoding::Hex => (
                decode_hex(&self.pattern)?,
                decode_hex(&self.replacement)?,
            ),
        };

        if pattern.is_empty() {
            return Err(Error::config_value("rules.pattern", "pattern must not be empty"));
        }
        Ok(MatchRule::new(pattern, replacement))
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self::text(
            String::from_utf8_lossy(DEFAULT_PATTERN),
            String::from_utf8_lossy(DEFAULT_REPLACEMENT),
        )
    }
}

/// Hex digits with optional whitespace between byte pairs
fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(hex::decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_rule() {
        let rule = RuleConfig::default().to_rule().unwrap();
        assert_eq!(rule.pattern(), b"magic string");
        assert_eq!(rule.replacement(), b"modified value");
    }

    #[test]
    fn test_hex_rule() {
        let config = RuleConfig {
            pattern: "de ad be ef".into(),
            replacement: "00".into(),
            encoding: Encoding::Hex,
        };
        let rule = config.to_rule().unwrap();
        assert_eq!(rule.pattern(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(rule.replacement(), &[0x00]);
    }

    #[test]
    fn test_bad_hex() {
        let config = RuleConfig {
            pattern: "xyz".into(),
            replacement: String::new(),
            encoding: Encoding::Hex,
        };
        assert!(matches!(config.to_rule(), Err(Error::HexDecode(_))));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let config = RuleConfig::text("", "x");
        assert!(matches!(config.to_rule(), Err(Error::ConfigValue { .. })));
    }

    #[test]
    fn test_empty_replacement_allowed() {
        let rule = RuleConfig::text("strip me", "").to_rule().unwrap();
        assert!(rule.replacement().is_empty());
    }
}
