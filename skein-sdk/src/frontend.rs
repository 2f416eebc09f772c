//! The collaborator interface: what the core needs from whoever is
//! rendering, scripting and prompting.
//!
//! Hooks and query callbacks never get direct access to the client. They
//! record requests on a [`Control`], and the core applies them as soon as
//! the call returns. After that the core re-checks that the server it was
//! working on still exists before doing anything else with it.

use std::fmt;

use crate::event::Event;
use crate::gate::ignore::IgnoreRule;
use crate::level::Levels;
use crate::registry::ServerRef;

/// Names a hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Phase two of a numeric reply, named by its three-digit code.
    Numeric(u16),
    Public,
    Msg,
    Notice,
    Action,
    Ctcp,
    CtcpReply,
    Join,
    Part,
    Kick,
    Quit,
    Nick,
    Mode,
    Topic,
    Invite,
    Wallop,
    Error,
    Kill,
    /// AWAY notification for a user sharing a channel.
    Away,
    Cap,
    /// A flood alarm was raised; claiming it lets the message through.
    Flood,
    /// Anything the router could not make sense of.
    OddServerStuff,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Numeric(n) => return write!(f, "{n:03}"),
            HookKind::Public => "PUBLIC",
            HookKind::Msg => "MSG",
            HookKind::Notice => "NOTICE",
            HookKind::Action => "ACTION",
            HookKind::Ctcp => "CTCP",
            HookKind::CtcpReply => "CTCP_REPLY",
            HookKind::Join => "JOIN",
            HookKind::Part => "LEAVE",
            HookKind::Kick => "KICK",
            HookKind::Quit => "SIGNOFF",
            HookKind::Nick => "NICKNAME",
            HookKind::Mode => "MODE",
            HookKind::Topic => "TOPIC",
            HookKind::Invite => "INVITE",
            HookKind::Wallop => "WALLOP",
            HookKind::Error => "ERROR",
            HookKind::Kill => "KILL",
            HookKind::Away => "AWAY",
            HookKind::Cap => "CAP",
            HookKind::Flood => "FLOOD",
            HookKind::OddServerStuff => "ODD_SERVER_STUFF",
        };
        f.write_str(name)
    }
}

/// A state change requested from inside a hook or callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send { server: ServerRef, line: String },
    Connect(ServerRef),
    Disconnect { server: ServerRef, reason: Option<String> },
    Delete(ServerRef),
    ChangeNick { server: ServerRef, nick: String },
    Ignore(IgnoreRule),
    Unignore(String),
}

/// Collects [`Action`]s during a hook or callback.
#[derive(Debug, Default)]
pub struct Control {
    actions: Vec<Action>,
}

impl Control {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw protocol line.
    pub fn send(&mut self, server: ServerRef, line: impl Into<String>) {
        self.actions.push(Action::Send {
            server,
            line: line.into(),
        });
    }

    pub fn connect(&mut self, server: ServerRef) {
        self.actions.push(Action::Connect(server));
    }

    pub fn disconnect(&mut self, server: ServerRef, reason: Option<&str>) {
        self.actions.push(Action::Disconnect {
            server,
            reason: reason.map(str::to_string),
        });
    }

    pub fn delete(&mut self, server: ServerRef) {
        self.actions.push(Action::Delete(server));
    }

    pub fn change_nick(&mut self, server: ServerRef, nick: &str) {
        self.actions.push(Action::ChangeNick {
            server,
            nick: nick.to_string(),
        });
    }

    pub fn ignore(&mut self, rule: IgnoreRule) {
        self.actions.push(Action::Ignore(rule));
    }

    pub fn unignore(&mut self, mask: &str) {
        self.actions.push(Action::Unignore(mask.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn take(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

/// Everything the core asks of a front end. Only `display` is mandatory.
pub trait Frontend: Send {
    /// Show one line of text. `target` is the channel or nick the line
    /// belongs to, `None` for the server window.
    fn display(&mut self, server: ServerRef, target: Option<&str>, level: Levels, text: &str);

    /// Offer an event to scripts. Returning `true` claims it and suppresses
    /// the default handling.
    fn hook(&mut self, _server: ServerRef, _kind: HookKind, _args: &[String], _ctl: &mut Control) -> bool {
        false
    }

    /// The server refused `rejected` and there is nothing left to try
    /// automatically. `None` leaves the connection waiting for `/nick`.
    fn prompt_nickname(&mut self, _server: ServerRef, _rejected: &str) -> Option<String> {
        None
    }

    fn event(&mut self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_names() {
        assert_eq!(HookKind::Numeric(1).to_string(), "001");
        assert_eq!(HookKind::Numeric(433).to_string(), "433");
        assert_eq!(HookKind::OddServerStuff.to_string(), "ODD_SERVER_STUFF");
        assert_eq!(HookKind::Away.to_string(), "AWAY");
    }

    #[test]
    fn control_collects_in_order() {
        let s = ServerRef { refnum: 0, generation: 1 };
        let mut ctl = Control::new();
        ctl.send(s, "PRIVMSG #c :hi");
        ctl.disconnect(s, Some("bye"));
        let actions = ctl.take();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], Action::Send { line, .. } if line == "PRIVMSG #c :hi"));
        assert!(ctl.is_empty());
    }
}
