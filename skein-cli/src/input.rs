//! Parse a line typed at the prompt into a command.
//!
//! Plain text goes to the current target. A leading `/` starts a command;
//! `//` escapes it so the text is sent with one slash.

use anyhow::{Result, bail};
use skein_sdk::Levels;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Text for the current target.
    Say(String),
    Me(String),
    Msg { target: String, text: String },
    Notice { target: String, text: String },
    /// Make `target` the current target without sending anything.
    Query(String),
    Join { channel: String, key: Option<String> },
    /// `None` leaves the current target.
    Part { channel: Option<String>, reason: Option<String> },
    Nick(String),
    /// `None` clears it.
    Away(Option<String>),
    Who { target: String, whox: Option<String> },
    Ison(Vec<String>),
    Userhost(Vec<String>),
    Quote(String),
    Ignore { mask: String, levels: Levels },
    Unignore(String),
    /// `None` reconnects the current server; an address adds a new one.
    Connect(Option<String>),
    Disconnect(Option<String>),
    /// Switch the current server by refnum.
    Server(u32),
    Servers,
    Flush,
    Help,
    Quit(Option<String>),
}

pub const HELP: &str = "\
/msg <target> <text>     /notice <target> <text>   /me <text>
/query <target>          /join <#chan> [key]        /part [#chan] [reason]
/nick <nick>             /away [message]            /quote <line>
/who <target> [%fields]  /ison <nick>...            /userhost <nick>...
/ignore <mask> [levels]  /unignore <mask>           /flush
/connect [host:port]     /disconnect [reason]       /server <n>
/servers                 /quit [reason]";

/// `None` for a blank line.
pub fn parse(line: &str) -> Result<Option<Input>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    if let Some(rest) = line.strip_prefix("//") {
        return Ok(Some(Input::Say(format!("/{rest}"))));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Say(line.to_string())));
    };

    let (verb, rest) = match command.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (command, ""),
    };
    let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());

    let input = match verb.to_ascii_lowercase().as_str() {
        "msg" | "privmsg" => {
            let (target, text) = two(verb, rest)?;
            Input::Msg { target, text }
        }
        "notice" => {
            let (target, text) = two(verb, rest)?;
            Input::Notice { target, text }
        }
        "me" => Input::Me(one(verb, rest)?),
        "query" => Input::Query(word(verb, rest)?),
        "join" | "j" => {
            let mut words = rest.split_whitespace();
            let Some(channel) = words.next() else {
                bail!("usage: /join <#channel> [key]");
            };
            Input::Join {
                channel: channel.to_string(),
                key: words.next().map(str::to_string),
            }
        }
        "part" | "leave" => {
            let (first, tail) = split_first(rest);
            if first.starts_with(['#', '&', '+', '!']) {
                Input::Part {
                    channel: Some(first.to_string()),
                    reason: opt(tail),
                }
            } else {
                Input::Part {
                    channel: None,
                    reason: opt(rest),
                }
            }
        }
        "nick" => Input::Nick(word(verb, rest)?),
        "away" => Input::Away(opt(rest)),
        "back" => Input::Away(None),
        "who" => {
            let mut words = rest.split_whitespace();
            let Some(target) = words.next() else {
                bail!("usage: /who <target> [%fields]");
            };
            Input::Who {
                target: target.to_string(),
                whox: words
                    .next()
                    .map(|f| f.trim_start_matches('%').to_string())
                    .filter(|f| !f.is_empty()),
            }
        }
        "ison" => Input::Ison(words(verb, rest)?),
        "userhost" => Input::Userhost(words(verb, rest)?),
        "quote" | "raw" => Input::Quote(one(verb, rest)?),
        "ignore" => {
            let (mask, levels) = split_first(rest);
            if mask.is_empty() {
                bail!("usage: /ignore <mask> [levels]");
            }
            let levels = if levels.is_empty() {
                Levels::all()
            } else {
                Levels::parse_list(levels)
            };
            if levels.is_empty() {
                bail!("unknown levels: {}", split_first(rest).1);
            }
            Input::Ignore {
                mask: mask.to_string(),
                levels,
            }
        }
        "unignore" => Input::Unignore(word(verb, rest)?),
        "connect" => Input::Connect(opt(rest)),
        "disconnect" => Input::Disconnect(opt(rest)),
        "server" => match rest.parse() {
            Ok(n) => Input::Server(n),
            Err(_) => bail!("usage: /server <refnum>"),
        },
        "servers" => Input::Servers,
        "flush" => Input::Flush,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit(opt(rest)),
        other => bail!("unknown command /{other} (try /help)"),
    };
    Ok(Some(input))
}

fn split_first(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((a, b)) => (a, b.trim()),
        None => (s, ""),
    }
}

fn one(verb: &str, rest: &str) -> Result<String> {
    if rest.is_empty() {
        bail!("/{verb} needs an argument");
    }
    Ok(rest.to_string())
}

fn word(verb: &str, rest: &str) -> Result<String> {
    match rest.split_whitespace().next() {
        Some(w) => Ok(w.to_string()),
        None => bail!("/{verb} needs an argument"),
    }
}

fn words(verb: &str, rest: &str) -> Result<Vec<String>> {
    let out: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
    if out.is_empty() {
        bail!("/{verb} needs at least one nick");
    }
    Ok(out)
}

fn two(verb: &str, rest: &str) -> Result<(String, String)> {
    match split_first(rest) {
        (target, text) if !target.is_empty() && !text.is_empty() => Ok((target.to_string(), text.to_string())),
        _ => bail!("usage: /{verb} <target> <text>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(line: &str) -> Input {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn plain_text_and_escapes() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(p("hello there"), Input::Say("hello there".into()));
        assert_eq!(p("//slash"), Input::Say("/slash".into()));
    }

    #[test]
    fn messages() {
        assert_eq!(
            p("/msg alice hi  there"),
            Input::Msg {
                target: "alice".into(),
                text: "hi  there".into()
            }
        );
        assert_eq!(
            p("/NOTICE #rust ping"),
            Input::Notice {
                target: "#rust".into(),
                text: "ping".into()
            }
        );
        assert!(parse("/msg alice").is_err());
        assert_eq!(p("/me waves"), Input::Me("waves".into()));
    }

    #[test]
    fn channels() {
        assert_eq!(
            p("/join #rust key"),
            Input::Join {
                channel: "#rust".into(),
                key: Some("key".into())
            }
        );
        assert_eq!(
            p("/part #rust see you"),
            Input::Part {
                channel: Some("#rust".into()),
                reason: Some("see you".into())
            }
        );
        assert_eq!(
            p("/part bye all"),
            Input::Part {
                channel: None,
                reason: Some("bye all".into())
            }
        );
        assert_eq!(
            p("/part"),
            Input::Part {
                channel: None,
                reason: None
            }
        );
    }

    #[test]
    fn queries() {
        assert_eq!(
            p("/who #rust %nuhaf"),
            Input::Who {
                target: "#rust".into(),
                whox: Some("nuhaf".into())
            }
        );
        assert_eq!(p("/ison alice bob"), Input::Ison(vec!["alice".into(), "bob".into()]));
        assert_eq!(p("/userhost carol"), Input::Userhost(vec!["carol".into()]));
        assert!(parse("/ison").is_err());
    }

    #[test]
    fn ignore_levels() {
        assert_eq!(
            p("/ignore spammer"),
            Input::Ignore {
                mask: "spammer".into(),
                levels: Levels::all()
            }
        );
        assert_eq!(
            p("/ignore *!*@bad.host public,msg"),
            Input::Ignore {
                mask: "*!*@bad.host".into(),
                levels: Levels::PUBLIC | Levels::MSG
            }
        );
        assert!(parse("/ignore x nonsense").is_err());
    }

    #[test]
    fn servers_and_lifecycle() {
        assert_eq!(p("/connect"), Input::Connect(None));
        assert_eq!(p("/connect irc.example.net:+7000"), Input::Connect(Some("irc.example.net:+7000".into())));
        assert_eq!(p("/server 2"), Input::Server(2));
        assert!(parse("/server two").is_err());
        assert_eq!(p("/quit gone fishing"), Input::Quit(Some("gone fishing".into())));
        assert_eq!(p("/away"), Input::Away(None));
        assert!(parse("/frobnicate").is_err());
    }
}
