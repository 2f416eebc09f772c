//! Textual verbs.

use crate::client::Client;
use crate::ctcp::{self, Ctcp};
use crate::event::Event;
use crate::frontend::HookKind;
use crate::level::Levels;
use crate::message::Message;
use crate::registry::ServerRef;

type Handler = fn(&mut Client, ServerRef, &Message);

/// Verb, mandatory argument count, handler. Lookup is exact and
/// case-sensitive.
const VERBS: &[(&str, usize, Handler)] = &[
    ("PRIVMSG", 2, privmsg),
    ("NOTICE", 2, notice),
    ("JOIN", 1, join),
    ("PART", 1, part),
    ("KICK", 2, kick),
    ("QUIT", 0, quit),
    ("NICK", 1, nick),
    ("MODE", 2, mode),
    ("TOPIC", 2, topic),
    ("INVITE", 2, invite),
    ("PING", 0, ping),
    ("PONG", 0, pong),
    ("ERROR", 0, error),
    ("KILL", 1, kill),
    ("WALLOPS", 1, wallops),
    ("AWAY", 0, away),
    ("CAP", 1, cap),
];

pub(super) fn lookup(verb: &str) -> Option<(usize, Handler)> {
    VERBS
        .iter()
        .find(|(name, _, _)| *name == verb)
        .map(|(_, min, handler)| (*min, *handler))
}

fn sender(msg: &Message) -> String {
    msg.sender.clone().unwrap_or_default()
}

fn is_channel(c: &Client, server: ServerRef, name: &str) -> bool {
    c.registry
        .get(server)
        .is_some_and(|conn| conn.features.is_channel(name))
}

fn privmsg(c: &mut Client, server: ServerRef, msg: &Message) {
    let (target, text) = (msg.arg(0), msg.arg(1));
    let nick = sender(msg);
    let public = is_channel(c, server, target);
    if let Some(req) = ctcp::parse(text) {
        ctcp_request(c, server, msg, target, public, req);
        return;
    }
    let (level, kind) = if public {
        (Levels::PUBLIC, HookKind::Public)
    } else {
        (Levels::MSG, HookKind::Msg)
    };
    if !c.gate(server, msg, public.then_some(target), level) {
        return;
    }
    let args = [nick.clone(), target.to_string(), text.to_string()];
    if public {
        c.present(server, kind, &args, Some(target), level, &format!("<{nick}> {text}"));
    } else {
        c.present(server, kind, &args, Some(nick.as_str()), level, &format!("*{nick}* {text}"));
    }
}

fn ctcp_request(c: &mut Client, server: ServerRef, msg: &Message, target: &str, public: bool, req: Ctcp<'_>) {
    let nick = sender(msg);
    let window = if public { target.to_string() } else { nick.clone() };
    if req.is("ACTION") {
        if !c.gate(server, msg, public.then_some(target), Levels::ACTION) {
            return;
        }
        let args = [nick.clone(), target.to_string(), req.args.to_string()];
        let text = format!("* {nick} {}", req.args);
        c.present(server, HookKind::Action, &args, Some(window.as_str()), Levels::ACTION, &text);
        return;
    }
    if !c.gate(server, msg, public.then_some(target), Levels::CTCP) {
        return;
    }
    if c.config.ctcp_replies {
        if let Some(reply) = ctcp::auto_reply(&req, &c.config.version_reply) {
            let _ = c.send_line(server, &format!("NOTICE {nick} :{reply}"));
        }
    }
    if !c.registry.contains(server) {
        return;
    }
    let command = req.command.to_ascii_uppercase();
    let args = [nick.clone(), target.to_string(), command.clone(), req.args.to_string()];
    let text = if public {
        format!("CTCP {command} from {nick} to {target}")
    } else {
        format!("CTCP {command} from {nick}")
    };
    c.present(server, HookKind::Ctcp, &args, Some(window.as_str()), Levels::CTCP, &text);
}

fn notice(c: &mut Client, server: ServerRef, msg: &Message) {
    let (target, text) = (msg.arg(0), msg.arg(1));
    let nick = sender(msg);
    if msg.from_server() {
        let args = [nick, target.to_string(), text.to_string()];
        c.present(server, HookKind::Notice, &args, None, Levels::SNOTE, text);
        return;
    }
    let public = is_channel(c, server, target);
    let channel = public.then_some(target);
    if let Some(reply) = ctcp::parse(text) {
        if !c.gate(server, msg, channel, Levels::CTCP) {
            return;
        }
        let command = reply.command.to_ascii_uppercase();
        let args = [nick.clone(), target.to_string(), command.clone(), reply.args.to_string()];
        let text = format!("CTCP {command} reply from {nick}: {}", reply.args);
        c.present(server, HookKind::CtcpReply, &args, Some(nick.as_str()), Levels::CTCP, &text);
        return;
    }
    if !c.gate(server, msg, channel, Levels::NOTICE) {
        return;
    }
    let args = [nick.clone(), target.to_string(), text.to_string()];
    if public {
        let line = format!("-{nick}:{target}- {text}");
        c.present(server, HookKind::Notice, &args, Some(target), Levels::NOTICE, &line);
    } else {
        c.present(server, HookKind::Notice, &args, Some(nick.as_str()), Levels::NOTICE, &format!("-{nick}- {text}"));
    }
}

fn join(c: &mut Client, server: ServerRef, msg: &Message) {
    let channel = msg.arg(0);
    let nick = sender(msg);
    let user_host = msg.user_host.as_deref();
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let me = conn.is_me(&nick);
    conn.channels.on_join(channel, &nick, user_host, me);
    if me {
        tracing::info!(server = %server, %channel, "Joined");
        c.emit(Event::Joined {
            server,
            channel: channel.to_string(),
        });
    } else if !c.gate(server, msg, Some(channel), Levels::JOIN) {
        return;
    }
    let uh = user_host.unwrap_or_default();
    let args = [nick.clone(), channel.to_string(), uh.to_string()];
    let text = format!("{nick} ({uh}) has joined {channel}");
    c.present(server, HookKind::Join, &args, Some(channel), Levels::JOIN, &text);
}

fn part(c: &mut Client, server: ServerRef, msg: &Message) {
    let (channel, reason) = (msg.arg(0), msg.arg(1));
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let me = conn.is_me(&nick);
    conn.channels.on_part(channel, &nick, me);
    if me {
        c.emit(Event::Parted {
            server,
            channel: channel.to_string(),
        });
    } else if !c.gate(server, msg, Some(channel), Levels::PART) {
        return;
    }
    let args = [nick.clone(), channel.to_string(), reason.to_string()];
    let text = if reason.is_empty() {
        format!("{nick} has left {channel}")
    } else {
        format!("{nick} has left {channel} ({reason})")
    };
    c.present(server, HookKind::Part, &args, Some(channel), Levels::PART, &text);
}

fn kick(c: &mut Client, server: ServerRef, msg: &Message) {
    let (channel, victim, reason) = (msg.arg(0), msg.arg(1), msg.arg(2));
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let me = conn.is_me(victim);
    conn.channels.on_part(channel, victim, me);
    let text = if me {
        c.emit(Event::Parted {
            server,
            channel: channel.to_string(),
        });
        format!("You have been kicked from {channel} by {nick} ({reason})")
    } else {
        if !c.gate(server, msg, Some(channel), Levels::KICK) {
            return;
        }
        format!("{victim} was kicked from {channel} by {nick} ({reason})")
    };
    let args = [nick.clone(), channel.to_string(), victim.to_string(), reason.to_string()];
    c.present(server, HookKind::Kick, &args, Some(channel), Levels::KICK, &text);
}

fn quit(c: &mut Client, server: ServerRef, msg: &Message) {
    let reason = msg.arg(0);
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let channels = conn.channels.on_quit(&nick);
    if !c.gate(server, msg, None, Levels::QUIT) {
        return;
    }
    let args = [nick.clone(), reason.to_string()];
    if c.offer_hook(server, HookKind::Quit, &args) || !c.registry.contains(server) {
        return;
    }
    let text = format!("{nick} has quit ({reason})");
    if channels.is_empty() {
        c.display(server, None, Levels::QUIT, &text);
    }
    for channel in &channels {
        c.display(server, Some(channel.as_str()), Levels::QUIT, &text);
    }
}

fn nick(c: &mut Client, server: ServerRef, msg: &Message) {
    let new = msg.arg(0);
    let old = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let me = conn.is_me(&old);
    let channels = conn.channels.on_nick(&old, new);
    if me {
        conn.nick = Some(new.to_string());
        conn.desired_nick = new.to_string();
        conn.pending_nick = None;
        conn.awaiting_nick = false;
        tracing::info!(server = %server, %old, %new, "Nickname changed");
        c.emit(Event::NickChanged {
            server,
            old: Some(old.clone()),
            new: new.to_string(),
        });
    } else if !c.gate(server, msg, None, Levels::NICK) {
        return;
    }
    let args = [old.clone(), new.to_string()];
    if c.offer_hook(server, HookKind::Nick, &args) || !c.registry.contains(server) {
        return;
    }
    let text = if me {
        format!("You are now known as {new}")
    } else {
        format!("{old} is now known as {new}")
    };
    if me || channels.is_empty() {
        c.display(server, None, Levels::NICK, &text);
    }
    if !me {
        for channel in &channels {
            c.display(server, Some(channel.as_str()), Levels::NICK, &text);
        }
    }
}

fn mode(c: &mut Client, server: ServerRef, msg: &Message) {
    let (target, modes) = (msg.arg(0), msg.arg(1));
    let params = msg.args.get(2..).unwrap_or_default();
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let public = conn.features.is_channel(target);
    if public {
        let features = conn.features.clone();
        conn.channels.on_mode(target, modes, params, &features);
    } else if conn.is_me(target) {
        apply_umodes(&mut conn.umodes, modes);
    }
    if public && !c.gate(server, msg, Some(target), Levels::MODE) {
        return;
    }
    let change = std::iter::once(modes)
        .chain(params.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let mut args = vec![nick.clone(), target.to_string()];
    args.extend(msg.args.iter().skip(1).cloned());
    let text = if public {
        format!("Mode change \"{change}\" on {target} by {nick}")
    } else {
        format!("Mode change \"{change}\" for user {target} by {nick}")
    };
    let window = public.then_some(target);
    c.present(server, HookKind::Mode, &args, window, Levels::MODE, &text);
}

/// Apply a `+abc-d` string to a user mode set.
pub(crate) fn apply_umodes(umodes: &mut std::collections::BTreeSet<char>, change: &str) {
    let mut adding = true;
    for ch in change.chars() {
        match ch {
            '+' => adding = true,
            '-' => adding = false,
            m if adding => {
                umodes.insert(m);
            }
            m => {
                umodes.remove(&m);
            }
        }
    }
}

fn topic(c: &mut Client, server: ServerRef, msg: &Message) {
    let (channel, text) = (msg.arg(0), msg.arg(1));
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    conn.channels.set_topic(channel, text);
    if !c.gate(server, msg, Some(channel), Levels::TOPIC) {
        return;
    }
    let args = [nick.clone(), channel.to_string(), text.to_string()];
    let line = format!("{nick} has changed the topic on {channel} to: {text}");
    c.present(server, HookKind::Topic, &args, Some(channel), Levels::TOPIC, &line);
}

fn invite(c: &mut Client, server: ServerRef, msg: &Message) {
    let channel = msg.arg(1);
    let nick = sender(msg);
    if !c.gate(server, msg, None, Levels::INVITE) {
        return;
    }
    let args = [nick.clone(), channel.to_string()];
    let text = format!("{nick} invites you to {channel}");
    c.present(server, HookKind::Invite, &args, None, Levels::INVITE, &text);
}

fn ping(c: &mut Client, server: ServerRef, msg: &Message) {
    let token = match msg.args.first() {
        Some(t) => t.clone(),
        None => c
            .registry
            .get(server)
            .map(|conn| conn.label())
            .unwrap_or_default(),
    };
    let _ = c.send_line(server, &format!("PONG :{token}"));
}

fn pong(_c: &mut Client, server: ServerRef, msg: &Message) {
    // The keepalive timer is reset by any inbound line.
    tracing::trace!(server = %server, token = %msg.trailing(), "PONG");
}

fn error(c: &mut Client, server: ServerRef, msg: &Message) {
    let text = msg.trailing();
    if let Some(conn) = c.registry.get_mut(server) {
        conn.disconnect_reason = Some(text.to_string());
    }
    tracing::warn!(server = %server, %text, "Server error");
    let args = [text.to_string()];
    c.present(server, HookKind::Error, &args, None, Levels::OTHER, &format!("ERROR: {text}"));
}

fn kill(c: &mut Client, server: ServerRef, msg: &Message) {
    let (target, reason) = (msg.arg(0), msg.arg(1));
    let nick = sender(msg);
    let Some(conn) = c.registry.get_mut(server) else {
        return;
    };
    let text = if conn.is_me(target) {
        let text = format!("You have been killed by {nick} ({reason})");
        conn.disconnect_reason = Some(text.clone());
        text
    } else {
        format!("{target} was killed by {nick} ({reason})")
    };
    let args = [nick.clone(), target.to_string(), reason.to_string()];
    c.present(server, HookKind::Kill, &args, None, Levels::OTHER, &text);
}

fn wallops(c: &mut Client, server: ServerRef, msg: &Message) {
    let text = msg.arg(0);
    let nick = sender(msg);
    if !c.gate(server, msg, None, Levels::WALLOP) {
        return;
    }
    let args = [nick.clone(), text.to_string()];
    c.present(server, HookKind::Wallop, &args, None, Levels::WALLOP, &format!("!{nick}! {text}"));
}

fn away(c: &mut Client, server: ServerRef, msg: &Message) {
    let nick = sender(msg);
    if !c.gate(server, msg, None, Levels::CRAP) {
        return;
    }
    let reason = msg.args.first();
    let text = match reason {
        Some(reason) => format!("{nick} is away: {reason}"),
        None => format!("{nick} is back"),
    };
    let args = [nick.clone(), reason.cloned().unwrap_or_default()];
    c.present(server, HookKind::Away, &args, None, Levels::CRAP, &text);
}

fn cap(c: &mut Client, server: ServerRef, msg: &Message) {
    let text = format!("CAP {}", msg.args.join(" "));
    c.present(server, HookKind::Cap, &msg.args, None, Levels::CRAP, &text);
}
