//! Payload matching and rewriting
//!
//! A [`RuleSet`] is an ordered list of byte patterns and their
//! replacements. Each rule replaces every non-overlapping occurrence of its
//! pattern, scanning left to right, before the next rule runs over the
//! result. Matching is byte-exact and case-sensitive.

use std::fmt;

/// Pattern and replacement used by the default configuration
pub const DEFAULT_PATTERN: &[u8] = b"magic string";

/// Replacement used by the default configuration
pub const DEFAULT_REPLACEMENT: &[u8] = b"modified value";

/// A single byte substitution
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pattern: Vec<u8>,
    replacement: Vec<u8>,
}

impl MatchRule {
    /// Create a rule
    ///
    /// An empty pattern is allowed but never matches.
    pub fn new(pattern: impl Into<Vec<u8>>, replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Bytes searched for
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Bytes substituted for each match
    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Count non-overlapping occurrences of the pattern
    pub fn count_matches(&self, haystack: &[u8]) -> usize {
        Matches::new(haystack, &self.pattern).count()
    }

    /// Replace every non-overlapping occurrence, or `None` if nothing matched
    pub fn replace_all(&self, haystack: &[u8]) -> Option<Vec<u8>> {
        let mut matches = Matches::new(haystack, &self.pattern).peekable();
        matches.peek()?;

        let mut out = Vec::with_capacity(haystack.len() + self.replacement.len());
        let mut last = 0;
        for start in matches {
            out.extend_from_slice(&haystack[last..start]);
            out.extend_from_slice(&self.replacement);
            last = start + self.pattern.len();
        }
        out.extend_from_slice(&haystack[last..]);
        Some(out)
    }
}

impl fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchRule")
            .field("pattern", &String::from_utf8_lossy(&self.pattern))
            .field("replacement", &String::from_utf8_lossy(&self.replacement))
            .finish()
    }
}

/// Outcome of applying a [`RuleSet`] to a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteResult {
    /// No rule matched
    Unchanged,
    /// At least one rule matched; carries the new payload
    Rewritten(Vec<u8>),
}

impl RewriteResult {
    /// True if a rule matched
    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }
}

/// Ordered sequence of rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<MatchRule>,
}

impl RuleSet {
    /// Create a rule set from rules in application order
    pub fn new(rules: Vec<MatchRule>) -> Self {
        Self { rules }
    }

    /// A rule set with a single rule
    pub fn single(pattern: impl Into<Vec<u8>>, replacement: impl Into<Vec<u8>>) -> Self {
        Self::new(vec![MatchRule::new(pattern, replacement)])
    }

    /// Rules in application order
    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order to the payload
    ///
    /// Absent payloads and payloads no rule matches are `Unchanged`.
    pub fn apply(&self, payload: Option<&[u8]>) -> RewriteResult {
        let Some(payload) = payload else {
            return RewriteResult::Unchanged;
        };

        let mut current: Option<Vec<u8>> = None;
        for rule in &self.rules {
            let input = current.as_deref().unwrap_or(payload);
            if let Some(next) = rule.replace_all(input) {
                current = Some(next);
            }
        }

        match current {
            Some(bytes) => RewriteResult::Rewritten(bytes),
            None => RewriteResult::Unchanged,
        }
    }
}

impl Default for MatchRule {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN, DEFAULT_REPLACEMENT)
    }
}

/// Start offsets of non-overlapping matches, left to right
struct Matches<'a> {
    haystack: &'a [u8],
    needle: &'a [u8],
    pos: usize,
}

impl<'a> Matches<'a> {
    fn new(haystack: &'a [u8], needle: &'a [u8]) -> Self {
        Self {
            haystack,
            needle,
            pos: 0,
        }
    }
}

impl Iterator for Matches<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let n = self.needle.len();
        if n == 0 || self.haystack.len() < n {
            return None;
        }
        while self.pos + n <= self.haystack.len() {
            let start = self.pos;
            if &self.haystack[start..start + n] == self.needle {
                self.pos = start + n;
                return Some(start);
            }
            self.pos += 1;
        }
        None
    }
}
