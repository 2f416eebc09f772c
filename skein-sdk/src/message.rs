//! IRC message decoding and encoding.
//!
//! Decoding never fails: servers disagree about the grammar in small ways
//! and a client has to take whatever arrives. Anything structurally broken
//! still produces a [`Message`], possibly with an empty command, and the
//! router decides what to do with it.

use std::collections::HashMap;
use std::fmt;

/// Protocol maximum of positional arguments after the command.
pub const MAX_ARGS: usize = 15;

/// The command of a decoded line: a textual verb or a numeric reply code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Verb(String),
    Numeric(u16),
}

impl Command {
    fn parse(token: &str) -> Self {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = token.parse::<u16>() {
                return Command::Numeric(n);
            }
        }
        Command::Verb(token.to_string())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Command::Numeric(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Verb(v) => f.write_str(v),
            Command::Numeric(n) => write!(f, "{n:03}"),
        }
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags (empty if none).
    pub tags: HashMap<String, String>,
    /// Sender nickname or server name.
    pub sender: Option<String>,
    /// `user@host` part of the sender, when the prefix carried a `!`.
    pub user_host: Option<String>,
    pub command: Command,
    pub args: Vec<String>,
}

impl Message {
    /// Build an outbound message.
    pub fn new(verb: &str, args: Vec<String>) -> Self {
        Self {
            tags: HashMap::new(),
            sender: None,
            user_host: None,
            command: Command::Verb(verb.to_string()),
            args,
        }
    }

    /// Decode one raw line (without CR/LF).
    pub fn parse(line: &str) -> Self {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut tags = HashMap::new();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (tag_str, tail) = split_token(tagged);
            tags = parse_tags(tag_str);
            rest = tail;
        }

        let mut sender = None;
        let mut user_host = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, tail) = split_token(prefixed);
            match prefix.split_once('!') {
                Some((nick, uh)) => {
                    sender = Some(nick.to_string());
                    user_host = Some(uh.to_string());
                }
                None => sender = Some(prefix.to_string()),
            }
            rest = tail;
        }

        let (command, mut rest) = split_token(rest);
        let command = Command::parse(command);

        let mut args = Vec::new();
        while !rest.is_empty() {
            if args.len() == MAX_ARGS - 1 {
                // The last slot absorbs everything left, verbatim.
                let last = rest.strip_prefix(':').unwrap_or(rest);
                args.push(last.to_string());
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                args.push(trailing.to_string());
                break;
            }
            let (token, tail) = split_token(rest);
            args.push(token.to_string());
            rest = tail;
        }

        Self { tags, sender, user_host, command, args }
    }

    /// Argument `idx`, or `""` if the server left it out.
    pub fn arg(&self, idx: usize) -> &str {
        self.args.get(idx).map(|s| s.as_str()).unwrap_or("")
    }

    /// The last argument, conventionally the human-readable text.
    pub fn trailing(&self) -> &str {
        self.args.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// Sender as `nick!user@host`, or just the sender when no user@host
    /// was present.
    pub fn full_sender(&self) -> Option<String> {
        let sender = self.sender.as_deref()?;
        Some(match self.user_host.as_deref() {
            Some(uh) => format!("{sender}!{uh}"),
            None => sender.to_string(),
        })
    }

    /// Sent by a server rather than a user: no user@host and the name
    /// looks like a hostname.
    pub fn from_server(&self) -> bool {
        match (&self.sender, &self.user_host) {
            (None, _) => true,
            (Some(s), None) => s.contains('.'),
            _ => false,
        }
    }
}

/// Split off the first space-delimited token; runs of spaces count as one
/// separator.
fn split_token(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(pos) => (&s[..pos], s[pos..].trim_start_matches(' ')),
        None => (s, ""),
    }
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((k, v)) => (k.to_string(), unescape_tag(v)),
            None => (t.to_string(), String::new()),
        })
        .collect()
}

fn unescape_tag(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sender) = &self.sender {
            write!(f, ":{sender}")?;
            if let Some(uh) = &self.user_host {
                write!(f, "!{uh}")?;
            }
            f.write_str(" ")?;
        }
        write!(f, "{}", self.command)?;
        let count = self.args.len();
        for (i, arg) in self.args.iter().enumerate() {
            let last = i + 1 == count;
            if last && (arg.is_empty() || arg.contains(' ') || arg.starts_with(':')) {
                write!(f, " :{arg}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
