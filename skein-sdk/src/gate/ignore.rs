//! Ignore rules: hostmask wildcard patterns with a level mask.
//!
//! Permitted wildcards are `*` (zero or more characters) and `?` (exactly
//! one character). Matching is case-insensitive.

use std::fmt;

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

use crate::level::Levels;

/// A wildcard pattern, stored lower-cased and compiled once.
#[derive(Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Pattern {
    text: String,
    compiled: WildMatch,
}

impl Pattern {
    pub fn new(s: &str) -> Self {
        let text = s.to_lowercase();
        let compiled = WildMatch::new(&text);
        Self { text, compiled }
    }

    pub fn matches(&self, s: &str) -> bool {
        self.compiled.matches(&s.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Clone for Pattern {
    fn clone(&self) -> Self {
        Self::new(&self.text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.text).finish()
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.text
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Expand a bare nickname or partial mask into a full `nick!user@host`
/// pattern: `bob` → `bob!*@*`, `*@host` → `*!*@host`.
pub fn normalize_mask(mask: &str) -> String {
    match (mask.contains('!'), mask.contains('@')) {
        (true, true) => mask.to_string(),
        (true, false) => format!("{mask}@*"),
        (false, true) => format!("*!{mask}"),
        (false, false) => format!("{mask}!*@*"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub pattern: Pattern,
    pub levels: Levels,
    /// Restrict the rule to one channel.
    #[serde(default)]
    pub channel: Option<String>,
}

impl IgnoreRule {
    pub fn new(mask: &str, levels: Levels) -> Self {
        Self {
            pattern: Pattern::new(&normalize_mask(mask)),
            levels,
            channel: None,
        }
    }

    pub fn in_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    fn applies(&self, hostmask: &str, channel: Option<&str>, level: Levels) -> bool {
        if !self.levels.intersects(level) {
            return false;
        }
        if let Some(only) = &self.channel {
            match channel {
                Some(c) if c.eq_ignore_ascii_case(only) => {}
                _ => return false,
            }
        }
        self.pattern.matches(hostmask)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    rules: Vec<IgnoreRule>,
}

impl IgnoreList {
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self { rules }
    }

    /// Add a rule, replacing any rule with the same pattern and channel.
    pub fn add(&mut self, rule: IgnoreRule) {
        self.rules
            .retain(|r| !(r.pattern == rule.pattern && r.channel == rule.channel));
        self.rules.push(rule);
    }

    /// Remove every rule whose pattern equals `mask` (after normalizing).
    /// Returns how many were removed.
    pub fn remove(&mut self, mask: &str) -> usize {
        let pattern = Pattern::new(&normalize_mask(mask));
        let before = self.rules.len();
        self.rules.retain(|r| r.pattern != pattern);
        before - self.rules.len()
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn is_ignored(&self, hostmask: &str, channel: Option<&str>, level: Levels) -> bool {
        self.rules.iter().any(|r| r.applies(hostmask, channel, level))
    }
}
