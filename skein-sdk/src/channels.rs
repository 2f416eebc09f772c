//! Per-connection channel table, maintained from JOIN/PART/KICK/QUIT/NICK,
//! MODE, 332 and 353 regardless of what hooks or ignores decide.

use std::collections::{BTreeMap, BTreeSet};

use crate::isupport::{CaseMapping, FeatureTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    pub nick: String,
    pub user_host: Option<String>,
    /// Membership prefix modes (`o`, `v`, ...).
    pub modes: BTreeSet<char>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    /// We sent JOIN and the server has not echoed it yet.
    pub pending: bool,
    pub key: Option<String>,
    /// Folded nick → member.
    members: BTreeMap<String, Member>,
}

impl Channel {
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    mapping: CaseMapping,
    /// Folded name → channel.
    channels: BTreeMap<String, Channel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_casemapping(&mut self, mapping: CaseMapping) {
        if mapping == self.mapping {
            return;
        }
        self.mapping = mapping;
        let old = std::mem::take(&mut self.channels);
        for (_, mut ch) in old {
            ch.members = ch
                .members
                .into_values()
                .map(|m| (mapping.fold(&m.nick), m))
                .collect();
            self.channels.insert(mapping.fold(&ch.name), ch);
        }
    }

    fn fold(&self, s: &str) -> String {
        self.mapping.fold(s)
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.fold(name))
    }

    /// Joined (not pending) channel names, in folded order.
    pub fn joined(&self) -> Vec<String> {
        self.channels
            .values()
            .filter(|c| !c.pending)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_joined(&self, name: &str) -> bool {
        self.get(name).is_some_and(|c| !c.pending)
    }

    /// Record a JOIN we sent.
    pub fn mark_pending(&mut self, name: &str, key: Option<&str>) {
        let folded = self.fold(name);
        let ch = self.channels.entry(folded).or_insert_with(|| Channel {
            name: name.to_string(),
            pending: true,
            ..Channel::default()
        });
        if key.is_some() {
            ch.key = key.map(str::to_string);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        let folded = self.fold(name);
        self.channels.remove(&folded)
    }

    pub fn on_join(&mut self, name: &str, nick: &str, user_host: Option<&str>, is_me: bool) {
        let folded = self.fold(name);
        let nick_key = self.fold(nick);
        if is_me {
            let ch = self.channels.entry(folded.clone()).or_default();
            ch.name = name.to_string();
            ch.pending = false;
            ch.members.clear();
        }
        if let Some(ch) = self.channels.get_mut(&folded) {
            ch.members.insert(
                nick_key,
                Member {
                    nick: nick.to_string(),
                    user_host: user_host.map(str::to_string),
                    modes: BTreeSet::new(),
                },
            );
        }
    }

    pub fn on_part(&mut self, name: &str, nick: &str, is_me: bool) {
        if is_me {
            self.remove(name);
            return;
        }
        let nick_key = self.fold(nick);
        let folded = self.fold(name);
        if let Some(ch) = self.channels.get_mut(&folded) {
            ch.members.remove(&nick_key);
        }
    }

    /// Remove `nick` everywhere. Returns the channels they were in.
    pub fn on_quit(&mut self, nick: &str) -> Vec<String> {
        let nick_key = self.fold(nick);
        self.channels
            .values_mut()
            .filter_map(|ch| ch.members.remove(&nick_key).map(|_| ch.name.clone()))
            .collect()
    }

    /// Rename a member everywhere. Returns the channels affected.
    pub fn on_nick(&mut self, old: &str, new: &str) -> Vec<String> {
        let old_key = self.fold(old);
        let new_key = self.fold(new);
        let mut seen = Vec::new();
        for ch in self.channels.values_mut() {
            if let Some(mut m) = ch.members.remove(&old_key) {
                m.nick = new.to_string();
                ch.members.insert(new_key.clone(), m);
                seen.push(ch.name.clone());
            }
        }
        seen
    }

    pub fn set_topic(&mut self, name: &str, topic: &str) {
        let folded = self.fold(name);
        if let Some(ch) = self.channels.get_mut(&folded) {
            ch.topic = (!topic.is_empty()).then(|| topic.to_string());
        }
    }

    /// One 353 line: space-separated nicks with membership prefixes.
    pub fn on_names(&mut self, name: &str, list: &str, features: &FeatureTable) {
        let prefixes = features.prefixes();
        let folded = self.fold(name);
        let mapping = self.mapping;
        let Some(ch) = self.channels.get_mut(&folded) else {
            return;
        };
        for token in list.split_whitespace() {
            let mut modes = BTreeSet::new();
            let mut rest = token;
            while let Some(c) = rest.chars().next() {
                match prefixes.iter().find(|(_, sym)| *sym == c) {
                    Some((mode, _)) => {
                        modes.insert(*mode);
                        rest = &rest[c.len_utf8()..];
                    }
                    None => break,
                }
            }
            // userhost-in-names form: nick!user@host
            let (nick, user_host) = match rest.split_once('!') {
                Some((n, uh)) => (n, Some(uh.to_string())),
                None => (rest, None),
            };
            if nick.is_empty() {
                continue;
            }
            ch.members.insert(
                mapping.fold(nick),
                Member {
                    nick: nick.to_string(),
                    user_host,
                    modes,
                },
            );
        }
    }

    /// Apply a channel MODE change to membership prefixes.
    pub fn on_mode(&mut self, name: &str, modes: &str, args: &[String], features: &FeatureTable) {
        let prefixes = features.prefixes();
        let folded = self.fold(name);
        let mapping = self.mapping;
        let Some(ch) = self.channels.get_mut(&folded) else {
            return;
        };
        let mut adding = true;
        let mut args = args.iter();
        for m in modes.chars() {
            match m {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    let arg = if features.mode_takes_arg(m, adding) { args.next() } else { None };
                    if m == 'k' {
                        ch.key = if adding { arg.cloned() } else { None };
                    }
                    if !prefixes.iter().any(|(pm, _)| *pm == m) {
                        continue;
                    }
                    let Some(target) = arg else { continue };
                    if let Some(member) = ch.members.get_mut(&mapping.fold(target)) {
                        if adding {
                            member.modes.insert(m);
                        } else {
                            member.modes.remove(&m);
                        }
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn join_names_part_lifecycle() {
        let features = FeatureTable::new();
        let mut t = ChannelTable::new();
        t.mark_pending("#Rust", None);
        assert!(!t.is_joined("#rust"));
        t.on_join("#Rust", "me", Some("me@host"), true);
        assert!(t.is_joined("#RUST"));
        t.on_names("#rust", "@op +voice plain me", &features);
        let ch = t.get("#rust").unwrap();
        assert_eq!(ch.member_count(), 4);
        let op = ch.members().find(|m| m.nick == "op").unwrap();
        assert!(op.modes.contains(&'o'));

        t.on_part("#rust", "plain", false);
        assert_eq!(t.get("#rust").unwrap().member_count(), 3);
        t.on_part("#rust", "me", true);
        assert!(t.get("#rust").is_none());
    }

    #[test]
    fn quit_and_nick_touch_every_channel() {
        let mut t = ChannelTable::new();
        for c in ["#a", "#b"] {
            t.on_join(c, "me", None, true);
            t.on_join(c, "bob", Some("b@h"), false);
        }
        let mut seen = t.on_nick("Bob", "robert");
        seen.sort();
        assert_eq!(seen, strings(&["#a", "#b"]));
        assert_eq!(t.on_quit("ROBERT").len(), 2);
        assert_eq!(t.get("#a").unwrap().member_count(), 1);
    }

    #[test]
    fn mode_updates_prefixes_and_key() {
        let features = FeatureTable::new();
        let mut t = ChannelTable::new();
        t.on_join("#c", "me", None, true);
        t.on_join("#c", "bob", None, false);
        t.on_mode("#c", "+ok-v", &strings(&["bob", "secret", "bob"]), &features);
        let ch = t.get("#c").unwrap();
        assert_eq!(ch.key.as_deref(), Some("secret"));
        assert!(ch.members().any(|m| m.nick == "bob" && m.modes.contains(&'o')));

        t.on_mode("#c", "-o", &strings(&["bob"]), &features);
        assert!(t.get("#c").unwrap().members().all(|m| m.modes.is_empty()));
    }

    #[test]
    fn rfc1459_folding_applies() {
        let mut t = ChannelTable::new();
        t.on_join("#a[1]", "me", None, true);
        assert!(t.is_joined("#A{1}"));
    }
}
