//! Numeric replies: phase one state updates, then hook and default display.

use crate::client::Client;
use crate::config::ServerSpec;
use crate::event::Event;
use crate::frontend::{Control, HookKind};
use crate::level::Levels;
use crate::message::Message;
use crate::nick::{self, NickAction, NickOrigin, PendingNick};
use crate::numeric::*;
use crate::queue::who::WhoReply;
use crate::registry::ServerRef;
use crate::state::ConnState;

use super::Flow;

impl Client {
    pub(super) fn route_numeric(&mut self, server: ServerRef, n: u16, msg: &Message) {
        if self.numeric_phase_one(server, n, msg) == Flow::Done {
            return;
        }
        if !self.registry.contains(server) {
            return;
        }
        if self.offer_hook(server, HookKind::Numeric(n), &msg.args) || !self.registry.contains(server) {
            return;
        }
        // arg0 is our own nick; the rest is the payload.
        let text = msg.args.get(1..).unwrap_or_default().join(" ");
        let window = msg
            .args
            .get(1)
            .filter(|a| {
                self.registry
                    .get(server)
                    .is_some_and(|c| c.features.is_channel(a))
            })
            .cloned();
        self.display(server, window.as_deref(), Levels::CRAP, &text);
    }

    fn numeric_phase_one(&mut self, server: ServerRef, n: u16, msg: &Message) -> Flow {
        let Some(conn) = self.registry.get_mut(server) else {
            return Flow::Done;
        };
        match n {
            RPL_WELCOME => self.on_welcome(server, msg),
            RPL_MYINFO => {
                if !msg.arg(1).is_empty() {
                    conn.itsname = Some(msg.arg(1).to_string());
                }
                Flow::Continue
            }
            RPL_ISUPPORT => {
                conn.features.apply_isupport(&msg.args);
                let mapping = conn.features.casemapping();
                conn.channels.set_casemapping(mapping);
                Flow::Continue
            }
            RPL_REDIR => self.on_redirect(server, msg),
            RPL_UMODEIS => {
                conn.umodes.clear();
                super::verbs::apply_umodes(&mut conn.umodes, msg.arg(1));
                Flow::Continue
            }
            RPL_USERHOST => {
                let mut ctl = Control::new();
                let out = conn.userhost.on_reply(server, msg.trailing(), &mut ctl);
                self.finish_query(server, out, ctl);
                Flow::Done
            }
            RPL_ISON => {
                let mut ctl = Control::new();
                let out = conn.ison.on_reply(server, msg.trailing(), &mut ctl);
                self.finish_query(server, out, ctl);
                Flow::Done
            }
            RPL_UNAWAY => {
                conn.away = None;
                Flow::Continue
            }
            RPL_WHOREPLY => {
                let Some(reply) = WhoReply::from_whoreply(&msg.args) else {
                    return Flow::Continue;
                };
                let mut ctl = Control::new();
                let out = conn.who.on_reply(server, &reply, &mut ctl);
                self.finish_query(server, out, ctl);
                Flow::Done
            }
            RPL_WHOSPCRPL => {
                let mut ctl = Control::new();
                match conn.who.on_whox(server, &msg.args, &mut ctl) {
                    Some(out) => {
                        self.finish_query(server, out, ctl);
                        Flow::Done
                    }
                    None => Flow::Continue,
                }
            }
            RPL_ENDOFWHO => {
                let mut ctl = Control::new();
                match conn.who.on_end(server, msg.arg(1), &mut ctl) {
                    Some(out) => {
                        self.finish_query(server, out, ctl);
                        Flow::Done
                    }
                    None => Flow::Continue,
                }
            }
            RPL_TOPIC => {
                conn.channels.set_topic(msg.arg(1), msg.arg(2));
                Flow::Continue
            }
            RPL_NAMREPLY => {
                let features = conn.features.clone();
                conn.channels.on_names(msg.arg(2), msg.arg(3), &features);
                Flow::Continue
            }
            ERR_NOSUCHNICK | ERR_NOSUCHSERVER | ERR_NOSUCHCHANNEL => {
                let mut ctl = Control::new();
                if let Some(out) = conn.who.on_error(server, msg.arg(1), &mut ctl) {
                    self.finish_query(server, out, ctl);
                    return Flow::Done;
                }
                if n == ERR_NOSUCHCHANNEL {
                    self.on_join_failed(server, msg.arg(1));
                }
                Flow::Continue
            }
            ERR_UNAVAILRESOURCE if conn.features.is_channel(msg.arg(1)) => {
                self.on_join_failed(server, msg.arg(1));
                Flow::Continue
            }
            n if is_join_failure(n) => {
                self.on_join_failed(server, msg.arg(1));
                Flow::Continue
            }
            n if is_nick_rejection(n) => {
                self.on_nick_rejected(server, n, msg);
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    /// 001: we are registered. Adopt the nick, replay the saved session,
    /// and only then let anyone else see the line.
    fn on_welcome(&mut self, server: ServerRef, msg: &Message) -> Flow {
        let Some(conn) = self.registry.get_mut(server) else {
            return Flow::Done;
        };
        let nick = match msg.arg(0) {
            "" => conn.current_nick().to_string(),
            n => n.to_string(),
        };
        conn.nick = Some(nick.clone());
        conn.desired_nick = nick.clone();
        conn.pending_nick = None;
        conn.awaiting_nick = false;
        conn.nick_fudges = 0;
        conn.attempts = 0;
        if let Some(name) = &msg.sender {
            conn.itsname = Some(name.clone());
        }
        tracing::info!(server = %server, %nick, "Registered");
        self.set_state(server, ConnState::Syncing);

        let Some(conn) = self.registry.get_mut(server) else {
            return Flow::Done;
        };
        let mut replay = Vec::new();
        let umodes = conn.spec.umodes.clone().or_else(|| {
            (!conn.umodes.is_empty()).then(|| format!("+{}", conn.umodes.iter().collect::<String>()))
        });
        conn.umodes.clear();
        if let Some(modes) = umodes {
            replay.push(format!("MODE {nick} {modes}"));
        }
        if let Some(away) = &conn.away {
            replay.push(format!("AWAY :{away}"));
        }
        let mut channels: Vec<String> = Vec::new();
        for entry in conn.rejoin.drain(..).chain(conn.spec.autojoin.iter().cloned()) {
            let name = entry.split(' ').next().unwrap_or_default();
            if !channels.iter().any(|c| c.split(' ').next() == Some(name)) {
                channels.push(entry);
            }
        }
        for entry in &channels {
            let (name, key) = match entry.split_once(' ') {
                Some((name, key)) => (name, Some(key)),
                None => (entry.as_str(), None),
            };
            conn.channels.mark_pending(name, key);
            replay.push(format!("JOIN {entry}"));
        }
        for line in replay {
            let _ = self.send_line(server, &line);
        }

        self.set_state(server, ConnState::Active);
        self.emit(Event::Registered { server, nick });
        Flow::Continue
    }

    /// 010: the server wants us elsewhere. The new server joins this one's
    /// group and the next reconnect goes there.
    fn on_redirect(&mut self, server: ServerRef, msg: &Message) -> Flow {
        let host = msg.arg(1).to_string();
        let Ok(port) = msg.arg(2).parse::<u16>() else {
            return Flow::Continue;
        };
        if host.is_empty() {
            return Flow::Continue;
        }
        let Some(conn) = self.registry.get_mut(server) else {
            return Flow::Done;
        };
        let group = conn.spec.group.clone().unwrap_or_else(|| conn.spec.addr());
        conn.spec.group = Some(group.clone());
        let spec = ServerSpec {
            host: host.clone(),
            port,
            group: Some(group.clone()),
            ..conn.spec.clone()
        };
        let existing = self
            .registry
            .iter()
            .find(|(_, c)| c.spec.group.as_deref() == Some(group.as_str()) && c.spec.host == host && c.spec.port == port)
            .map(|(r, _)| r);
        let target = match existing {
            Some(r) => r,
            None => self.add_server(spec),
        };
        if let Some(conn) = self.registry.get_mut(server) {
            conn.reconnects_to = Some(target);
        }
        tracing::info!(server = %server, to = %target, %host, port, "Redirected");
        self.emit(Event::Redirected {
            from: server,
            to: target,
            host,
            port,
        });
        Flow::Continue
    }

    fn on_join_failed(&mut self, server: ServerRef, channel: &str) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        if conn.channels.get(channel).is_some_and(|c| c.pending) {
            conn.channels.remove(channel);
        }
        let mapping = conn.features.casemapping();
        conn.rejoin.retain(|c| !mapping.eq(c, channel));
    }

    fn on_nick_rejected(&mut self, server: ServerRef, n: u16, msg: &Message) {
        let max_fudges = self.config.max_nick_fudges;
        let auto_fudge = self.config.auto_fudge_nick;
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        let Some(pending) = conn.pending_nick.clone() else {
            return;
        };
        let action = nick::on_rejection(n, &pending, conn.nick_fudges, max_fudges, auto_fudge, conn.features.nicklen());
        tracing::debug!(server = %server, numeric = n, nick = %pending.nick, ?action, "Nickname rejected");
        match action {
            NickAction::Retry(next) => {
                conn.nick_fudges += 1;
                conn.pending_nick = Some(PendingNick {
                    nick: next.clone(),
                    ..pending.clone()
                });
                self.display_notice(server, &format!("Nickname {} unavailable, trying {next}", pending.nick));
                let _ = self.send_line(server, &format!("NICK {next}"));
            }
            NickAction::Restore(previous) => {
                conn.pending_nick = None;
                let keeping = previous.unwrap_or_default();
                self.display_notice(
                    server,
                    &format!("Nickname {} refused ({}); keeping {keeping}", pending.nick, msg.trailing()),
                );
            }
            NickAction::Prompt => self.prompt_nickname(server, &pending.nick),
        }
    }

    fn prompt_nickname(&mut self, server: ServerRef, rejected: &str) {
        let answer = self
            .frontend
            .prompt_nickname(server, rejected)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        match answer {
            Some(nick) => {
                conn.pending_nick = Some(PendingNick {
                    nick: nick.clone(),
                    origin: NickOrigin::Automatic,
                    previous: conn.nick.clone(),
                });
                conn.nick_fudges = 0;
                conn.awaiting_nick = false;
                let _ = self.send_line(server, &format!("NICK {nick}"));
            }
            None => {
                conn.pending_nick = None;
                conn.awaiting_nick = true;
                self.display_notice(server, &format!("Nickname {rejected} unavailable; use /nick to pick another"));
            }
        }
    }
}
