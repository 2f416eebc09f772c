//! The 005 feature table and the helpers that read it.
//!
//! Keys are case-insensitive. The table is cleared whenever a new
//! registration starts; feature sets are not portable across reconnects,
//! even to the same host.

use std::collections::HashMap;

/// Default NICKLEN when the server does not advertise one (RFC 1459).
pub const DEFAULT_NICKLEN: usize = 9;

#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    /// Folded key → (key as sent, value).
    entries: HashMap<String, (String, String)>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the arguments of one 005 line. The leading nickname is
    /// skipped, and so is a final argument that is human text ("are
    /// supported by this server"). Some servers leave that text out.
    pub fn apply_isupport(&mut self, args: &[String]) {
        let Some((_nick, mut tokens)) = args.split_first() else {
            return;
        };
        if let Some((last, rest)) = tokens.split_last() {
            if last.is_empty() || last.contains(' ') {
                tokens = rest;
            }
        }
        for token in tokens {
            self.apply_token(token);
        }
    }

    /// `KEY`, `KEY=VALUE` or `-KEY`.
    pub fn apply_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        if let Some(key) = token.strip_prefix('-') {
            self.entries.remove(&key.to_ascii_uppercase());
            return;
        }
        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        self.set(key, value);
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_ascii_uppercase(), (key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_uppercase())
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_uppercase())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn nicklen(&self) -> usize {
        self.get("NICKLEN")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_NICKLEN)
    }

    /// Channel name prefixes, `#&` when unadvertised.
    pub fn chantypes(&self) -> &str {
        match self.get("CHANTYPES") {
            Some(v) if !v.is_empty() => v,
            _ => "#&",
        }
    }

    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes().contains(c))
    }

    /// Membership prefix map from `PREFIX=(ov)@+`, as (mode, symbol) pairs.
    pub fn prefixes(&self) -> Vec<(char, char)> {
        let raw = self.get("PREFIX").unwrap_or("(ov)@+");
        let Some(rest) = raw.strip_prefix('(') else {
            return Vec::new();
        };
        let Some((modes, symbols)) = rest.split_once(')') else {
            return Vec::new();
        };
        modes.chars().zip(symbols.chars()).collect()
    }

    /// Whether channel mode `mode` consumes an argument when set (`adding`)
    /// or unset, per `CHANMODES=A,B,C,D` and `PREFIX`.
    pub fn mode_takes_arg(&self, mode: char, adding: bool) -> bool {
        if self.prefixes().iter().any(|(m, _)| *m == mode) {
            return true;
        }
        let raw = self.get("CHANMODES").unwrap_or("beI,k,l,imnpst");
        let classes: Vec<&str> = raw.split(',').collect();
        let in_class = |i: usize| classes.get(i).is_some_and(|c| c.contains(mode));
        in_class(0) || in_class(1) || (adding && in_class(2))
    }

    pub fn casemapping(&self) -> CaseMapping {
        match self.get("CASEMAPPING").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "ascii" => CaseMapping::Ascii,
            Some(v) if v == "strict-rfc1459" => CaseMapping::StrictRfc1459,
            _ => CaseMapping::Rfc1459,
        }
    }
}

/// Nickname/channel case folding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMapping {
    Ascii,
    #[default]
    Rfc1459,
    StrictRfc1459,
}

impl CaseMapping {
    pub fn fold(self, s: &str) -> String {
        s.chars()
            .map(|c| match (self, c) {
                (_, 'A'..='Z') => c.to_ascii_lowercase(),
                (CaseMapping::Ascii, _) => c,
                (_, '[') => '{',
                (_, ']') => '}',
                (_, '\\') => '|',
                (CaseMapping::Rfc1459, '~') => '^',
                _ => c,
            })
            .collect()
    }

    pub fn eq(self, a: &str, b: &str) -> bool {
        self.fold(a) == self.fold(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn isupport_tokens_set_and_overwrite() {
        let mut t = FeatureTable::new();
        t.apply_isupport(&args(&["me", "NICKLEN=30", "WHOX", "CHANTYPES=#", "are supported"]));
        assert_eq!(t.get("nicklen"), Some("30"));
        assert_eq!(t.get("WHOX"), Some(""));
        assert_eq!(t.nicklen(), 30);
        t.apply_isupport(&args(&["me", "nicklen=16", "are supported"]));
        assert_eq!(t.nicklen(), 16);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn last_token_counts_without_trailing_text() {
        let mut t = FeatureTable::new();
        let msg = crate::message::Message::parse(":srv 005 me NICKLEN=30 CHANTYPES=#");
        t.apply_isupport(&msg.args);
        assert_eq!(t.get("NICKLEN"), Some("30"));
        assert_eq!(t.get("CHANTYPES"), Some("#"));

        let msg = crate::message::Message::parse(":srv 005 me PREFIX=(ov)@+ :are supported by this server");
        t.apply_isupport(&msg.args);
        assert_eq!(t.get("PREFIX"), Some("(ov)@+"));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn negated_token_removes() {
        let mut t = FeatureTable::new();
        t.apply_token("EXCEPTS=e");
        t.apply_token("-EXCEPTS");
        assert!(!t.contains("EXCEPTS"));
    }

    #[test]
    fn defaults_when_unadvertised() {
        let t = FeatureTable::new();
        assert_eq!(t.nicklen(), DEFAULT_NICKLEN);
        assert!(t.is_channel("#rust"));
        assert!(t.is_channel("&local"));
        assert!(!t.is_channel("nick"));
        assert_eq!(t.prefixes(), vec![('o', '@'), ('v', '+')]);
    }

    #[test]
    fn mode_argument_classes() {
        let mut t = FeatureTable::new();
        t.apply_token("CHANMODES=beI,k,l,imnst");
        t.apply_token("PREFIX=(qaohv)~&@%+");
        assert!(t.mode_takes_arg('b', false));
        assert!(t.mode_takes_arg('k', false));
        assert!(t.mode_takes_arg('l', true));
        assert!(!t.mode_takes_arg('l', false));
        assert!(!t.mode_takes_arg('m', true));
        assert!(t.mode_takes_arg('h', true));
    }

    #[test]
    fn rfc1459_folding() {
        let m = CaseMapping::Rfc1459;
        assert!(m.eq("Nick[a]", "nick{a}"));
        assert!(m.eq("x~", "X^"));
        assert!(!CaseMapping::Ascii.eq("a[", "a{"));
        assert!(!CaseMapping::StrictRfc1459.eq("x~", "x^"));
    }
}
