//! CTCP: `\x01`-delimited requests inside PRIVMSG and replies inside NOTICE.

pub const DELIM: char = '\x01';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// Upper-cased by convention but not by us; compare case-insensitively.
    pub command: &'a str,
    pub args: &'a str,
}

impl Ctcp<'_> {
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}

/// Decode a CTCP payload. The closing delimiter is optional; some clients
/// drop it.
pub fn parse(text: &str) -> Option<Ctcp<'_>> {
    let inner = text.strip_prefix(DELIM)?;
    let inner = inner.strip_suffix(DELIM).unwrap_or(inner);
    let (command, args) = inner.split_once(' ').unwrap_or((inner, ""));
    if command.is_empty() {
        return None;
    }
    Some(Ctcp { command, args })
}

pub fn encode(command: &str, args: &str) -> String {
    if args.is_empty() {
        format!("{DELIM}{command}{DELIM}")
    } else {
        format!("{DELIM}{command} {args}{DELIM}")
    }
}

/// Requests we answer automatically.
pub const SUPPORTED: &str = "ACTION CLIENTINFO PING TIME VERSION";

/// The NOTICE payload answering `req`, if it is one we answer.
pub fn auto_reply(req: &Ctcp<'_>, version: &str) -> Option<String> {
    let args = if req.is("VERSION") {
        version.to_string()
    } else if req.is("PING") {
        req.args.to_string()
    } else if req.is("TIME") {
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
    } else if req.is("CLIENTINFO") {
        SUPPORTED.to_string()
    } else {
        return None;
    };
    Some(encode(&req.command.to_ascii_uppercase(), &args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_and_bare_requests() {
        let c = parse("\x01ACTION waves hello\x01").unwrap();
        assert!(c.is("action"));
        assert_eq!(c.args, "waves hello");
        let c = parse("\x01VERSION").unwrap();
        assert_eq!((c.command, c.args), ("VERSION", ""));
        assert!(parse("plain text").is_none());
        assert!(parse("\x01\x01").is_none());
    }

    #[test]
    fn answers_known_requests() {
        let ping = parse("\x01PING 12345\x01").unwrap();
        assert_eq!(auto_reply(&ping, "v").as_deref(), Some("\x01PING 12345\x01"));
        let version = parse("\x01version\x01").unwrap();
        assert_eq!(auto_reply(&version, "skein 1").as_deref(), Some("\x01VERSION skein 1\x01"));
        let unknown = parse("\x01FINGER\x01").unwrap();
        assert!(auto_reply(&unknown, "v").is_none());
    }
}
