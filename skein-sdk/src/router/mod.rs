//! Inbound line routing.
//!
//! Every decoded line goes through two phases. Phase one updates
//! connection state (nickname, channels, queues, features) and is never
//! skipped. Phase two offers the line to the front end's hook and, if the
//! hook does not claim it, displays it. Messages from other users pass the
//! ignore/flood gate between the two.
//!
//! Hooks may delete or disconnect the server mid-line; every step after a
//! hook re-checks the handle before touching the connection again.

mod numerics;
mod verbs;

use std::time::Instant;

use crate::client::Client;
use crate::frontend::{Control, HookKind};
use crate::gate::{self, Sender, Verdict};
use crate::level::Levels;
use crate::message::{Command, Message};
use crate::registry::ServerRef;

/// Whether phase two still runs after phase one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Done,
}

impl Client {
    /// Route one raw line received on `server`.
    pub(crate) fn route(&mut self, server: ServerRef, line: &str) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        conn.last_inbound = Instant::now();
        conn.ping_sent = None;
        tracing::debug!(server = %server, "<- {line}");

        let msg = Message::parse(line);
        match &msg.command {
            Command::Numeric(n) => self.route_numeric(server, *n, &msg),
            Command::Verb(verb) if verb.is_empty() => self.odd_server_stuff(server, &msg, line),
            Command::Verb(verb) => match verbs::lookup(verb) {
                Some((min_args, handler)) if msg.args.len() >= min_args => handler(self, server, &msg),
                _ => self.odd_server_stuff(server, &msg, line),
            },
        }

        if let Some(conn) = self.registry.get_mut(server) {
            conn.resolve_flush_waiters();
        }
    }

    /// Lines the router could not make sense of are offered as
    /// ODD_SERVER_STUFF, then shown as they arrived. Never dropped.
    fn odd_server_stuff(&mut self, server: ServerRef, msg: &Message, line: &str) {
        tracing::debug!(server = %server, command = %msg.command, "Unhandled line");
        let mut args = vec![msg.sender.clone().unwrap_or_default(), msg.command.to_string()];
        args.extend(msg.args.iter().cloned());
        if self.offer_hook(server, HookKind::OddServerStuff, &args) || !self.registry.contains(server) {
            return;
        }
        self.display(server, None, Levels::CRAP, line);
    }

    /// Run a message from another user through the ignore list and the
    /// flood tracker. Servers and our own echoes always pass.
    pub(crate) fn gate(&mut self, server: ServerRef, msg: &Message, channel: Option<&str>, level: Levels) -> bool {
        let nick = msg.sender.as_deref().unwrap_or_default();
        let mut ctl = Control::new();
        let verdict = {
            let Client {
                registry,
                ignores,
                frontend,
                ..
            } = self;
            let Some(conn) = registry.get_mut(server) else {
                return false;
            };
            if msg.from_server() || conn.is_me(nick) {
                return true;
            }
            let sender = Sender {
                nick,
                user_host: msg.user_host.as_deref(),
            };
            gate::check(ignores, &mut conn.flood, sender, channel, level, Instant::now(), |alarm| {
                tracing::info!(server = %server, source = %alarm.source, count = alarm.count, "Flood detected");
                let args = vec![
                    alarm.source.clone(),
                    alarm.channel.clone().unwrap_or_default(),
                    alarm.level.names(),
                    alarm.count.to_string(),
                    format!("{:.1}", alarm.rate),
                ];
                frontend.hook(server, HookKind::Flood, &args, &mut ctl)
            })
        };
        self.apply(ctl);
        if verdict != Verdict::Allow {
            tracing::trace!(server = %server, ?verdict, %nick, "Message gated");
        }
        verdict == Verdict::Allow && self.registry.contains(server)
    }

    /// Phase two for a verb: hook, then display unless claimed.
    pub(crate) fn present(
        &mut self,
        server: ServerRef,
        kind: HookKind,
        args: &[String],
        target: Option<&str>,
        level: Levels,
        text: &str,
    ) {
        if self.offer_hook(server, kind, args) || !self.registry.contains(server) {
            return;
        }
        self.display(server, target, level, text);
    }
}

#[cfg(test)]
mod tests;
