//! A recording front end and helpers for driving a [`Client`] without
//! sockets.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::Client;
use crate::config::{ClientConfig, ServerSpec};
use crate::event::Event;
use crate::frontend::{Control, Frontend, HookKind};
use crate::level::Levels;
use crate::registry::ServerRef;
use crate::transport::Outbound;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seen {
    Display {
        target: Option<String>,
        level: Levels,
        text: String,
    },
    Hook {
        kind: HookKind,
        args: Vec<String>,
    },
    Event(Event),
    Prompt(String),
}

type HookFn = Box<dyn FnMut(ServerRef, HookKind, &[String], &mut Control) -> bool + Send>;

#[derive(Default)]
pub(crate) struct Script {
    pub seen: Vec<Seen>,
    pub claim: Vec<HookKind>,
    pub prompt_answers: VecDeque<Option<String>>,
    pub on_hook: Option<HookFn>,
}

#[derive(Clone, Default)]
pub(crate) struct Recorder(pub Arc<Mutex<Script>>);

impl Recorder {
    pub fn displays(&self) -> Vec<(Option<String>, Levels, String)> {
        self.0
            .lock()
            .seen
            .iter()
            .filter_map(|s| match s {
                Seen::Display { target, level, text } => Some((target.clone(), *level, text.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.displays().into_iter().map(|(_, _, t)| t).collect()
    }

    pub fn hooks(&self) -> Vec<HookKind> {
        self.0
            .lock()
            .seen
            .iter()
            .filter_map(|s| match s {
                Seen::Hook { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.0
            .lock()
            .seen
            .iter()
            .filter_map(|s| match s {
                Seen::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.0.lock().seen.clone()
    }

    pub fn claim(&self, kind: HookKind) {
        self.0.lock().claim.push(kind);
    }

    pub fn answer_prompt(&self, answer: Option<&str>) {
        self.0
            .lock()
            .prompt_answers
            .push_back(answer.map(str::to_string));
    }

    pub fn on_hook(&self, f: impl FnMut(ServerRef, HookKind, &[String], &mut Control) -> bool + Send + 'static) {
        self.0.lock().on_hook = Some(Box::new(f));
    }

    pub fn clear(&self) {
        self.0.lock().seen.clear();
    }
}

impl Frontend for Recorder {
    fn display(&mut self, _server: ServerRef, target: Option<&str>, level: Levels, text: &str) {
        self.0.lock().seen.push(Seen::Display {
            target: target.map(str::to_string),
            level,
            text: text.to_string(),
        });
    }

    fn hook(&mut self, server: ServerRef, kind: HookKind, args: &[String], ctl: &mut Control) -> bool {
        let mut script = self.0.lock();
        script.seen.push(Seen::Hook {
            kind,
            args: args.to_vec(),
        });
        let claimed = script.claim.contains(&kind);
        match script.on_hook.as_mut() {
            Some(f) => f(server, kind, args, ctl) || claimed,
            None => claimed,
        }
    }

    fn prompt_nickname(&mut self, _server: ServerRef, rejected: &str) -> Option<String> {
        let mut script = self.0.lock();
        script.seen.push(Seen::Prompt(rejected.to_string()));
        script.prompt_answers.pop_front().flatten()
    }

    fn event(&mut self, event: &Event) {
        self.0.lock().seen.push(Seen::Event(event.clone()));
    }
}

pub(crate) fn client() -> (Client, Recorder) {
    client_with(ClientConfig::default())
}

pub(crate) fn client_with(config: ClientConfig) -> (Client, Recorder) {
    let recorder = Recorder::default();
    let (client, _handle) = Client::new(config, recorder.clone());
    (client, recorder)
}

pub(crate) fn spec(nick: &str) -> ServerSpec {
    ServerSpec {
        host: "irc.test".to_string(),
        nick: nick.to_string(),
        ..ServerSpec::default()
    }
}

/// Lines queued on the link so far.
pub(crate) fn sent(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        match item {
            Outbound::Line(line) => out.push(line),
            Outbound::Close => out.push("<close>".to_string()),
        }
    }
    out
}

/// A server whose link is up and which has seen 001 for `nick`.
pub(crate) fn registered(c: &mut Client, nick: &str) -> (ServerRef, mpsc::UnboundedReceiver<Outbound>) {
    let server = c.add_server(spec(nick));
    let mut rx = c.attach_test_link(server);
    c.route(server, &format!(":irc.test 001 {nick} :Welcome"));
    sent(&mut rx);
    (server, rx)
}
