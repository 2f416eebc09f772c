//! USERHOST requests and 302 replies.

use super::{Callback, Entry, Outcome, Placement, Queue, QueryEvent, chunk_words, finish_chain, split_callback};
use crate::frontend::Control;
use crate::line::MAX_PAYLOAD;
use crate::registry::ServerRef;

/// Servers answer at most this many nicks per USERHOST.
pub const USERHOST_MAX_NICKS: usize = 5;

/// What the server said about one requested nick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserhostInfo {
    pub nick: String,
    /// `false` when the server omitted the nick (it is not online).
    pub found: bool,
    pub oper: bool,
    pub away: bool,
    pub user: String,
    pub host: String,
}

impl UserhostInfo {
    fn missing(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Self::default()
        }
    }

    pub fn display_line(&self) -> String {
        if !self.found {
            return format!("{}: no such nick", self.nick);
        }
        let mut line = format!("{} is {}@{}", self.nick, self.user, self.host);
        if self.oper {
            line.push_str(" (IRC operator)");
        }
        if self.away {
            line.push_str(" (away)");
        }
        line
    }
}

/// Parse the text of a 302: `nick[*]=<+|->user@host` tokens.
pub fn parse_reply(text: &str) -> Vec<UserhostInfo> {
    text.split_whitespace()
        .filter_map(|token| {
            let (left, right) = token.split_once('=')?;
            let (nick, oper) = match left.strip_suffix('*') {
                Some(n) => (n, true),
                None => (left, false),
            };
            let away = right.starts_with('-');
            let uh = right.trim_start_matches(['+', '-']);
            let (user, host) = uh.split_once('@').unwrap_or((uh, ""));
            Some(UserhostInfo {
                nick: nick.to_string(),
                found: true,
                oper,
                away,
                user: user.to_string(),
                host: host.to_string(),
            })
        })
        .collect()
}

pub struct UserhostQueue {
    inner: Queue<Vec<String>, UserhostInfo>,
}

impl UserhostQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            inner: Queue::new(Some(max_in_flight)),
        }
    }

    /// Queue a request for `nicks`, five per line. Returns the lines to
    /// send now.
    pub fn request(&mut self, nicks: &[String], callback: Option<Callback<UserhostInfo>>) -> Vec<String> {
        let chunks = chunk_words("USERHOST", nicks, MAX_PAYLOAD, USERHOST_MAX_NICKS);
        if chunks.is_empty() {
            return Vec::new();
        }
        let callbacks: Vec<Option<Callback<UserhostInfo>>> = match callback {
            Some(cb) => split_callback(cb, chunks.len()).into_iter().map(Some).collect(),
            None => (0..chunks.len()).map(|_| None).collect(),
        };
        let mut wires = Vec::new();
        for (chunk, cb) in chunks.into_iter().zip(callbacks) {
            let wire = format!("USERHOST {}", chunk.join(" "));
            if self.inner.enqueue(Entry::new(wire.clone(), chunk, cb)) == Placement::Dispatch {
                wires.push(wire);
            }
        }
        wires
    }

    /// A 302 line; `text` is its trailing argument.
    pub fn on_reply(&mut self, server: ServerRef, text: &str, ctl: &mut Control) -> Outcome {
        let found = parse_reply(text);
        let mut out = Outcome::default();
        if self.inner.is_empty() {
            tracing::debug!(server = %server, "Unsolicited USERHOST reply");
            out.display.extend(found.iter().map(UserhostInfo::display_line));
            return out;
        }
        let mut shown = false;
        for entry in self.inner.head_chain_mut() {
            entry.dirty = true;
            let infos: Vec<UserhostInfo> = entry
                .criteria
                .iter()
                .map(|nick| {
                    found
                        .iter()
                        .find(|f| f.nick.eq_ignore_ascii_case(nick))
                        .cloned()
                        .unwrap_or_else(|| UserhostInfo::missing(nick))
                })
                .collect();
            let mut silent = false;
            for info in &infos {
                silent |= !entry.deliver(server, QueryEvent::Reply(info), ctl);
            }
            if silent && !shown {
                out.display.extend(infos.iter().map(UserhostInfo::display_line));
                shown = true;
            }
        }
        finish_chain(self.inner.pop_chain(), server, ctl);
        out.send = self.inner.promote();
        out
    }

    pub fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
