//! Nickname negotiation.
//!
//! A nickname we picked ourselves (from configuration, or while
//! registering) is mangled and retried when the server rejects it. A
//! nickname the user typed is never mangled: if the server refuses it the
//! change is abandoned and the old nickname stays.

use crate::numeric::{ERR_ERRONEUSNICKNAME, ERR_NICKTOOFAST, ERR_NONICKNAMEGIVEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickOrigin {
    Automatic,
    Explicit,
}

/// A NICK we sent and the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNick {
    pub nick: String,
    pub origin: NickOrigin,
    /// Confirmed nickname at the time of the request.
    pub previous: Option<String>,
}

/// What to do about a rejected nickname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NickAction {
    /// Send `NICK` with this one.
    Retry(String),
    /// Nothing automatic left; ask the front end.
    Prompt,
    /// Drop the pending change and keep `previous`.
    Restore(Option<String>),
}

/// Mangle `nick` into a new candidate: pad with `_` up to `nicklen`, then
/// rotate the last character to the front. `None` when mangling no longer
/// produces anything new.
pub fn fudge(nick: &str, nicklen: usize) -> Option<String> {
    let len = nick.chars().count();
    if len == 0 {
        return None;
    }
    if len < nicklen {
        return Some(format!("{nick}_"));
    }
    // Over-long nicks are cut to the limit before rotating.
    let mut chars: Vec<char> = nick.chars().take(nicklen.max(1)).collect();
    let last = chars.pop()?;
    chars.insert(0, last);
    let rotated: String = chars.into_iter().collect();
    (rotated != nick).then_some(rotated)
}

/// Decide the response to nickname rejection `numeric`.
pub fn on_rejection(
    numeric: u16,
    pending: &PendingNick,
    fudges_used: u32,
    max_fudges: u32,
    auto_fudge: bool,
    nicklen: usize,
) -> NickAction {
    if pending.origin == NickOrigin::Explicit {
        return match &pending.previous {
            Some(prev) => NickAction::Restore(Some(prev.clone())),
            None => NickAction::Prompt,
        };
    }
    if matches!(numeric, ERR_ERRONEUSNICKNAME | ERR_NONICKNAMEGIVEN | ERR_NICKTOOFAST) {
        return NickAction::Prompt;
    }
    if !auto_fudge || fudges_used >= max_fudges {
        return NickAction::Prompt;
    }
    match fudge(&pending.nick, nicklen) {
        Some(next) => NickAction::Retry(next),
        None => NickAction::Prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{ERR_NICKNAMEINUSE, ERR_UNAVAILRESOURCE};

    fn auto(nick: &str) -> PendingNick {
        PendingNick {
            nick: nick.to_string(),
            origin: NickOrigin::Automatic,
            previous: None,
        }
    }

    #[test]
    fn fudge_pads_then_rotates() {
        assert_eq!(fudge("bob", 9).as_deref(), Some("bob_"));
        assert_eq!(fudge("bob______", 9).as_deref(), Some("_bob_____"));
        assert_eq!(fudge("abcdefghi", 9).as_deref(), Some("iabcdefgh"));
        assert_eq!(fudge("_________", 9), None);
        assert_eq!(fudge("abcdefghijk", 9).as_deref(), Some("iabcdefgh"));
    }

    #[test]
    fn automatic_nick_is_fudged_until_the_limit() {
        let p = auto("bob");
        assert_eq!(on_rejection(ERR_NICKNAMEINUSE, &p, 0, 3, true, 9), NickAction::Retry("bob_".into()));
        assert_eq!(on_rejection(ERR_UNAVAILRESOURCE, &p, 2, 3, true, 9), NickAction::Retry("bob_".into()));
        assert_eq!(on_rejection(ERR_NICKNAMEINUSE, &p, 3, 3, true, 9), NickAction::Prompt);
        assert_eq!(on_rejection(ERR_NICKNAMEINUSE, &p, 0, 3, false, 9), NickAction::Prompt);
    }

    #[test]
    fn erroneous_nick_prompts() {
        assert_eq!(on_rejection(ERR_ERRONEUSNICKNAME, &auto("b@d"), 0, 9, true, 9), NickAction::Prompt);
    }

    #[test]
    fn explicit_nick_is_never_fudged() {
        let p = PendingNick {
            nick: "wanted".into(),
            origin: NickOrigin::Explicit,
            previous: Some("current".into()),
        };
        for n in [ERR_NICKNAMEINUSE, ERR_NICKTOOFAST, ERR_ERRONEUSNICKNAME] {
            assert_eq!(on_rejection(n, &p, 0, 9, true, 9), NickAction::Restore(Some("current".into())));
        }
    }
}
