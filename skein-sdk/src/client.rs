//! The client core.
//!
//! One [`Client`] owns every connection and is driven by one loop,
//! [`Client::run`]. Front ends talk to it through a cloneable
//! [`ClientHandle`]; the per-connection I/O tasks talk to it through an
//! event channel. Nothing else touches connection state, so there are no
//! locks around it.
//!
//! ## Reconnection
//!
//! When a link drops, the failed connection's group is searched for the
//! next server to try, starting at its `reconnects_to` hint (itself unless
//! a redirect said otherwise). Servers that are deleted, busy, or have used
//! up their attempts are skipped. The first eligible one gets exactly one
//! attempt, delayed by exponential backoff with jitter (2→4→8→16→30s by
//! default). If none is eligible the failure is reported and the
//! connection is closed.

use std::time::{Duration, Instant};

use anyhow::Result;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use crate::config::{ClientConfig, ServerSpec};
use crate::error::ClientError;
use crate::event::Event;
use crate::frontend::{Action, Control, Frontend, HookKind};
use crate::gate::ignore::{IgnoreList, IgnoreRule};
use crate::level::Levels;
use crate::nick::{NickOrigin, PendingNick};
use crate::queue::Callback;
use crate::queue::Outcome;
use crate::queue::ison::IsonReply;
use crate::queue::userhost::UserhostInfo;
use crate::queue::who::{WhoReply, WhoRequest};
use crate::registry::{Registry, ServerRef};
use crate::state::{ConnState, Connection, FlushWaiter, Link};
use crate::transport::{self, ConnectTarget, IoEvent, IoMessage, IoSender, Outbound, Reporter, Stream};

/// How long shutdown waits for QUITs to flush.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// An operation on one server, sent through a [`ClientHandle`].
pub enum ServerOp {
    Connect,
    Disconnect(Option<String>),
    Delete,
    /// A raw protocol line.
    Raw(String),
    Message { target: String, text: String, notice: bool },
    Nick(String),
    Join { channel: String, key: Option<String> },
    Part { channel: String, reason: Option<String> },
    Away(Option<String>),
    Who(WhoRequest, Option<Callback<WhoReply>>),
    Ison(Vec<String>, Option<Callback<IsonReply>>),
    Userhost(Vec<String>, Option<Callback<UserhostInfo>>),
    /// Resolve once the WHO, ISON and USERHOST queues are empty.
    Flush,
}

/// Commands the front end can send to the core.
pub enum Command {
    AddServer {
        spec: ServerSpec,
        reply: oneshot::Sender<ServerRef>,
    },
    Server {
        server: ServerRef,
        op: ServerOp,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Servers {
        reply: oneshot::Sender<Vec<ServerSummary>>,
    },
    Ignore(IgnoreRule),
    Unignore(String),
    Shutdown(Option<String>),
}

/// A snapshot of one connection for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSummary {
    pub server: ServerRef,
    pub addr: String,
    pub group: Option<String>,
    pub state: ConnState,
    pub nick: Option<String>,
    pub secure: bool,
}

/// A handle to a running [`Client`].
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn add_server(&self, spec: ServerSpec) -> Result<ServerRef> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddServer { spec, reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(rx.await.map_err(|_| ClientError::Shutdown)?)
    }

    pub async fn servers(&self) -> Result<Vec<ServerSummary>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Servers { reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(rx.await.map_err(|_| ClientError::Shutdown)?)
    }

    async fn server_op(&self, server: ServerRef, op: ServerOp) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Server { server, op, reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)??;
        Ok(())
    }

    pub async fn connect(&self, server: ServerRef) -> Result<()> {
        self.server_op(server, ServerOp::Connect).await
    }

    pub async fn disconnect(&self, server: ServerRef, reason: Option<&str>) -> Result<()> {
        self.server_op(server, ServerOp::Disconnect(reason.map(str::to_string)))
            .await
    }

    pub async fn delete(&self, server: ServerRef) -> Result<()> {
        self.server_op(server, ServerOp::Delete).await
    }

    pub async fn raw(&self, server: ServerRef, line: &str) -> Result<()> {
        self.server_op(server, ServerOp::Raw(line.to_string())).await
    }

    pub async fn privmsg(&self, server: ServerRef, target: &str, text: &str) -> Result<()> {
        self.server_op(
            server,
            ServerOp::Message {
                target: target.to_string(),
                text: text.to_string(),
                notice: false,
            },
        )
        .await
    }

    pub async fn notice(&self, server: ServerRef, target: &str, text: &str) -> Result<()> {
        self.server_op(
            server,
            ServerOp::Message {
                target: target.to_string(),
                text: text.to_string(),
                notice: true,
            },
        )
        .await
    }

    pub async fn nick(&self, server: ServerRef, nick: &str) -> Result<()> {
        self.server_op(server, ServerOp::Nick(nick.to_string())).await
    }

    pub async fn join(&self, server: ServerRef, channel: &str, key: Option<&str>) -> Result<()> {
        self.server_op(
            server,
            ServerOp::Join {
                channel: channel.to_string(),
                key: key.map(str::to_string),
            },
        )
        .await
    }

    pub async fn part(&self, server: ServerRef, channel: &str, reason: Option<&str>) -> Result<()> {
        self.server_op(
            server,
            ServerOp::Part {
                channel: channel.to_string(),
                reason: reason.map(str::to_string),
            },
        )
        .await
    }

    pub async fn away(&self, server: ServerRef, message: Option<&str>) -> Result<()> {
        self.server_op(server, ServerOp::Away(message.map(str::to_string)))
            .await
    }

    pub async fn who(
        &self,
        server: ServerRef,
        request: WhoRequest,
        callback: Option<Callback<WhoReply>>,
    ) -> Result<()> {
        self.server_op(server, ServerOp::Who(request, callback)).await
    }

    pub async fn ison(
        &self,
        server: ServerRef,
        nicks: Vec<String>,
        callback: Option<Callback<IsonReply>>,
    ) -> Result<()> {
        self.server_op(server, ServerOp::Ison(nicks, callback)).await
    }

    pub async fn userhost(
        &self,
        server: ServerRef,
        nicks: Vec<String>,
        callback: Option<Callback<UserhostInfo>>,
    ) -> Result<()> {
        self.server_op(server, ServerOp::Userhost(nicks, callback))
            .await
    }

    /// Wait until every outstanding WHO/ISON/USERHOST on `server` has
    /// finished. Other connections keep running meanwhile.
    pub async fn flush(&self, server: ServerRef) -> Result<()> {
        self.server_op(server, ServerOp::Flush).await
    }

    pub async fn ignore(&self, rule: IgnoreRule) -> Result<()> {
        self.cmd_tx
            .send(Command::Ignore(rule))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(())
    }

    pub async fn unignore(&self, mask: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Unignore(mask.to_string()))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(())
    }

    /// Quit every server and stop the loop.
    pub async fn shutdown(&self, reason: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Shutdown(reason.map(str::to_string)))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(())
    }
}

pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) registry: Registry<Connection>,
    pub(crate) ignores: IgnoreList,
    pub(crate) frontend: Box<dyn Frontend>,
    io_tx: IoSender,
    io_rx: mpsc::UnboundedReceiver<IoMessage>,
    cmd_rx: mpsc::Receiver<Command>,
    next_session: u64,
    shutdown_at: Option<Instant>,
}

impl Client {
    pub fn new(config: ClientConfig, frontend: impl Frontend + 'static) -> (Self, ClientHandle) {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let client = Self {
            ignores: IgnoreList::new(config.ignores.clone()),
            config,
            registry: Registry::new(),
            frontend: Box::new(frontend),
            io_tx,
            io_rx,
            cmd_rx,
            next_session: 0,
            shutdown_at: None,
        };
        (client, ClientHandle { cmd_tx })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn ignores(&self) -> &IgnoreList {
        &self.ignores
    }

    pub fn connection(&self, server: ServerRef) -> Option<&Connection> {
        self.registry.get(server)
    }

    #[cfg(test)]
    pub(crate) fn connection_mut(&mut self, server: ServerRef) -> &mut Connection {
        match self.registry.get_mut(server) {
            Some(conn) => conn,
            None => panic!("no server {server}"),
        }
    }

    pub fn add_server(&mut self, spec: ServerSpec) -> ServerRef {
        let config = &self.config;
        let server = self
            .registry
            .insert_with(|me| Connection::new(me, spec, config));
        tracing::info!(server = %server, "Server added");
        server
    }

    pub fn servers(&self) -> Vec<ServerSummary> {
        self.registry
            .iter()
            .map(|(server, c)| ServerSummary {
                server,
                addr: c.spec.addr(),
                group: c.spec.group.clone(),
                state: c.state,
                nick: c.nick.clone(),
                secure: c.secure,
            })
            .collect()
    }

    /// Drive every connection until shutdown, or until every handle has
    /// been dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut commands_open = true;
        loop {
            let sleep = match self.next_deadline() {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)),
                None => tokio::time::sleep(Duration::from_secs(3600)),
            };
            tokio::select! {
                Some(msg) = self.io_rx.recv() => self.on_io(msg),
                cmd = self.cmd_rx.recv(), if commands_open => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        commands_open = false;
                        self.begin_shutdown(None);
                    }
                },
                _ = sleep => self.on_timer(Instant::now()),
            }
            if self.shutdown_complete() {
                tracing::info!("Client stopped");
                return Ok(());
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddServer { spec, reply } => {
                let server = self.add_server(spec);
                let _ = reply.send(server);
            }
            Command::Servers { reply } => {
                let _ = reply.send(self.servers());
            }
            Command::Ignore(rule) => self.ignores.add(rule),
            Command::Unignore(mask) => {
                self.ignores.remove(&mask);
            }
            Command::Shutdown(reason) => self.begin_shutdown(reason),
            Command::Server { server, op: ServerOp::Flush, reply } => self.flush(server, reply),
            Command::Server { server, op, reply } => {
                let result = self.server_op(server, op);
                if let Err(e) = &result {
                    tracing::debug!(server = %server, error = %e, "Command failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn server_op(&mut self, server: ServerRef, op: ServerOp) -> Result<(), ClientError> {
        if !self.registry.contains(server) {
            return Err(ClientError::NoSuchServer(server.refnum));
        }
        match op {
            ServerOp::Connect => self.connect(server),
            ServerOp::Disconnect(reason) => self.disconnect(server, reason.as_deref()),
            ServerOp::Delete => self.delete(server),
            ServerOp::Raw(line) => self.send_line(server, &line),
            ServerOp::Message { target, text, notice } => self.message(server, &target, &text, notice),
            ServerOp::Nick(nick) => self.change_nick(server, &nick),
            ServerOp::Join { channel, key } => self.join(server, &channel, key.as_deref()),
            ServerOp::Part { channel, reason } => match reason {
                Some(r) => self.send_line(server, &format!("PART {channel} :{r}")),
                None => self.send_line(server, &format!("PART {channel}")),
            },
            ServerOp::Away(message) => self.set_away(server, message),
            ServerOp::Who(request, callback) => self.who(server, request, callback),
            ServerOp::Ison(nicks, callback) => self.ison(server, &nicks, callback),
            ServerOp::Userhost(nicks, callback) => self.userhost(server, &nicks, callback),
            ServerOp::Flush => Ok(()),
        }
    }

    // ── Lifecycle ──

    fn next_session(&mut self) -> u64 {
        self.next_session += 1;
        self.next_session
    }

    pub(crate) fn set_state(&mut self, server: ServerRef, to: ConnState) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        let from = conn.state;
        if from == to {
            return;
        }
        conn.state = to;
        tracing::debug!(server = %server, %from, %to, "State change");
        self.emit(Event::StateChanged { server, from, to });
    }

    /// Start connecting now. Resets the attempt counter: this is a user
    /// decision, not a retry.
    pub fn connect(&mut self, server: ServerRef) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if conn.state.is_busy() && conn.state != ConnState::Reconnect {
            return Ok(());
        }
        conn.attempts = 0;
        conn.closing_requested = false;
        self.start_attempt(server);
        Ok(())
    }

    fn start_attempt(&mut self, server: ServerRef) {
        let Some(spec) = self.registry.get(server).map(|c| c.spec.clone()) else {
            return;
        };
        let tls = if spec.tls {
            match crate::tls::client_config(&spec.tls_verify, spec.cert_pin.as_deref()) {
                Ok(config) => Some(config),
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(server = %server, error = %e, "TLS setup failed");
                    self.display_notice(server, &format!("Cannot connect: {reason}"));
                    self.fail(server, ConnState::Error, reason);
                    return;
                }
            }
        } else {
            None
        };
        let target = ConnectTarget {
            host: spec.host.clone(),
            port: spec.port,
            vhost: spec.vhost.clone(),
            tls,
            timeout: self.config.connect_timeout(),
        };
        let session = self.next_session();
        tracing::info!(server = %server, addr = %spec.addr(), session, "Connecting");
        let reporter = Reporter::new(self.io_tx.clone(), server, session);
        let mut link = Link::pending(session);
        link.add_task(transport::spawn_connect(target, reporter));
        if let Some(conn) = self.registry.get_mut(server) {
            conn.link = Some(link);
            conn.reconnect_at = None;
            conn.secure = false;
        }
        self.set_state(server, ConnState::Dns);
    }

    fn on_io(&mut self, msg: IoMessage) {
        let IoMessage { server, session, event } = msg;
        let Some(conn) = self.registry.get(server) else {
            return;
        };
        if conn.session() != Some(session) {
            tracing::trace!(server = %server, session, "Dropping event from a stale session");
            return;
        }
        let closing = conn.state == ConnState::Closing;
        match event {
            IoEvent::Progress(state) => {
                if matches!(conn.state, ConnState::Dns | ConnState::Connecting) {
                    self.set_state(server, state);
                }
            }
            IoEvent::Connected { stream, local, remote } => self.on_connected(server, stream, local, remote),
            IoEvent::ConnectFailed(e) => {
                tracing::warn!(server = %server, error = %e, "Connection failed");
                if e.is_tls_handshake() {
                    if let Some(conn) = self.registry.get_mut(server) {
                        conn.secure = false;
                    }
                }
                let reason = e.to_string();
                self.display_notice(server, &format!("Connection failed: {reason}"));
                self.fail(server, ConnState::Error, reason);
            }
            IoEvent::Line(line) => self.route(server, &line),
            IoEvent::Eof | IoEvent::Closed if closing => self.finish_close(server),
            IoEvent::ReadError(_) | IoEvent::WriteError(_) if closing => self.finish_close(server),
            IoEvent::Eof | IoEvent::Closed => {
                let reason = conn
                    .disconnect_reason
                    .clone()
                    .unwrap_or_else(|| "connection closed by server".to_string());
                self.fail(server, ConnState::Eof, reason);
            }
            IoEvent::ReadError(e) | IoEvent::WriteError(e) => {
                tracing::warn!(server = %server, error = %e, "Link error");
                self.fail(server, ConnState::Error, e.to_string());
            }
        }
    }

    fn on_connected(&mut self, server: ServerRef, stream: Stream, local: Option<std::net::SocketAddr>, remote: std::net::SocketAddr) {
        let secure = matches!(stream, Stream::Tls(_));
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        let Some(session) = conn.session() else {
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Reporter::new(self.io_tx.clone(), server, session);
        if let Some(link) = conn.link.as_mut() {
            for task in transport::spawn_io(stream, reporter, rx) {
                link.add_task(task);
            }
        }
        conn.secure = secure;
        conn.local_addr = local;
        conn.remote_addr = Some(remote);
        tracing::info!(server = %server, %remote, secure, "Connected");
        self.emit(Event::Connected { server, remote, secure });
        self.start_registration(server, tx);
    }

    /// Attach the outbound channel and send the registration lines.
    pub(crate) fn start_registration(&mut self, server: ServerRef, tx: mpsc::UnboundedSender<Outbound>) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        if let Some(link) = conn.link.as_mut() {
            link.set_outbound(tx);
        }
        conn.begin_registration();
        conn.last_inbound = Instant::now();
        conn.pending_nick = Some(PendingNick {
            nick: conn.desired_nick.clone(),
            origin: NickOrigin::Automatic,
            previous: None,
        });
        let mut lines = Vec::new();
        if let Some(pass) = &conn.spec.password {
            lines.push(format!("PASS {pass}"));
        }
        lines.push(format!("USER {} 0 * :{}", conn.spec.username, conn.spec.realname));
        lines.push(format!("NICK {}", conn.desired_nick));
        self.set_state(server, ConnState::Registering);
        for line in lines {
            let _ = self.send_line(server, &line);
        }
    }

    /// The link is gone. Record why, tear down, and let the reconnect
    /// policy decide what happens next.
    pub(crate) fn fail(&mut self, server: ServerRef, state: ConnState, reason: String) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        let rejoin = if conn.state.is_registered() {
            conn.channels.joined()
        } else {
            conn.rejoin.clone()
        };
        let reason = conn.disconnect_reason.take().unwrap_or(reason);
        let label = conn.label();
        let was_connected = conn.state.is_connected();
        let user_closed = conn.closing_requested;
        conn.teardown();
        self.set_state(server, state);
        tracing::info!(server = %server, %reason, "Disconnected");
        if was_connected {
            self.display_notice(server, &format!("Connection to {label} lost: {reason}"));
        }
        self.emit(Event::Disconnected {
            server,
            reason: reason.clone(),
        });
        if user_closed {
            self.set_state(server, ConnState::Closed);
            return;
        }
        self.reconnect_policy(server, rejoin, &reason);
    }

    fn group_of(&self, server: ServerRef) -> Vec<ServerRef> {
        let group = self
            .registry
            .get(server)
            .and_then(|c| c.spec.group.clone());
        match group {
            Some(g) => self
                .registry
                .iter()
                .filter(|(_, c)| c.spec.group.as_deref() == Some(g.as_str()))
                .map(|(r, _)| r)
                .collect(),
            None => vec![server],
        }
    }

    fn reconnect_policy(&mut self, failed: ServerRef, rejoin: Vec<String>, reason: &str) {
        let policy = self.config.reconnect.clone();
        if !policy.enabled {
            self.set_state(failed, ConnState::Closed);
            return;
        }
        let start = self
            .registry
            .get(failed)
            .and_then(|c| c.reconnects_to)
            .filter(|r| self.registry.contains(*r))
            .unwrap_or(failed);
        let mut rotation = self.group_of(failed);
        if !rotation.contains(&start) {
            rotation.insert(0, start);
        }
        let pos = rotation.iter().position(|r| *r == start).unwrap_or(0);
        let n = rotation.len();
        let chosen = (0..n).map(|i| rotation[(pos + i) % n]).find(|candidate| {
            self.registry.get(*candidate).is_some_and(|c| {
                c.state != ConnState::Deleted
                    && (*candidate == failed || !c.state.is_busy())
                    && c.attempts < policy.max_attempts
            })
        });

        let Some(next) = chosen else {
            let attempts = self.registry.get(failed).map_or(0, |c| c.attempts);
            tracing::warn!(server = %failed, attempts, "No server left to try");
            self.set_state(failed, ConnState::Closed);
            self.display_notice(
                failed,
                &format!("Giving up after {attempts} attempts ({reason}); use /connect to retry"),
            );
            self.emit(Event::GaveUp {
                server: failed,
                reason: reason.to_string(),
            });
            return;
        };

        let session = self.next_session();
        let Some(conn) = self.registry.get_mut(next) else {
            return;
        };
        conn.attempts += 1;
        let attempt = conn.attempts;
        let base = policy.delay_for(attempt);
        let jitter = rand_jitter(u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX));
        let delay = base.saturating_add(Duration::from_millis(jitter));
        if next == failed || !rejoin.is_empty() {
            conn.rejoin = rejoin;
        }
        conn.link = Some(Link::pending(session));
        conn.reconnect_at = Instant::now().checked_add(delay);
        let label = conn.label();
        self.set_state(next, ConnState::Reconnect);
        if next != failed {
            self.set_state(failed, ConnState::Closed);
        }
        tracing::info!(server = %next, failed = %failed, attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.display_notice(
            next,
            &format!("Reconnecting to {label} in {:.1}s (attempt {attempt})", delay.as_secs_f64()),
        );
        self.emit(Event::ReconnectScheduled {
            server: next,
            failed,
            attempt,
            delay,
        });
    }

    /// Quit and close without reconnecting.
    pub fn disconnect(&mut self, server: ServerRef, reason: Option<&str>) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        conn.closing_requested = true;
        match conn.state {
            ConnState::Registering | ConnState::Syncing | ConnState::Active => {
                let message = reason
                    .map(str::to_string)
                    .or_else(|| conn.quit_message.clone())
                    .unwrap_or_else(|| "Leaving".to_string());
                if let Some(link) = &conn.link {
                    link.send(Outbound::Line(format!("QUIT :{message}")));
                    link.send(Outbound::Close);
                }
                tracing::debug!(server = %server, "-> QUIT :{message}");
                self.set_state(server, ConnState::Closing);
            }
            ConnState::Reconnect | ConnState::Dns | ConnState::Connecting | ConnState::TlsConnecting => {
                conn.reconnect_at = None;
                conn.teardown();
                self.set_state(server, ConnState::Closed);
            }
            ConnState::Closing | ConnState::Closed | ConnState::Deleted => {}
            ConnState::Created | ConnState::Eof | ConnState::Error => {
                self.set_state(server, ConnState::Closed);
            }
        }
        Ok(())
    }

    fn finish_close(&mut self, server: ServerRef) {
        let Some(conn) = self.registry.get_mut(server) else {
            return;
        };
        conn.teardown();
        self.set_state(server, ConnState::Closed);
        self.emit(Event::Disconnected {
            server,
            reason: "closed".to_string(),
        });
    }

    /// Remove a server for good. Its handle stops resolving.
    pub fn delete(&mut self, server: ServerRef) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if conn.state.is_connected() {
            if let Some(link) = &conn.link {
                link.send(Outbound::Line("QUIT :Server deleted".to_string()));
                link.send(Outbound::Close);
            }
        }
        conn.teardown();
        self.set_state(server, ConnState::Deleted);
        self.registry.remove(server);
        for (_, other) in self.registry.iter_mut() {
            if other.reconnects_to == Some(server) {
                other.reconnects_to = None;
            }
        }
        tracing::info!(server = %server, "Server deleted");
        self.emit(Event::Deleted { server });
        Ok(())
    }

    fn on_timer(&mut self, now: Instant) {
        let ping_interval = self.config.ping_interval();
        let ping_timeout = self.config.ping_timeout();
        for server in self.registry.refs() {
            let Some(conn) = self.registry.get_mut(server) else {
                continue;
            };
            match conn.state {
                ConnState::Reconnect if conn.reconnect_at.is_some_and(|at| at <= now) => {
                    self.start_attempt(server);
                }
                ConnState::Registering | ConnState::Syncing | ConnState::Active => {
                    let idle = now.saturating_duration_since(conn.last_inbound);
                    if idle >= ping_timeout {
                        tracing::warn!(server = %server, idle_secs = idle.as_secs(), "Ping timeout");
                        self.fail(server, ConnState::Eof, "ping timeout".to_string());
                    } else if conn.ping_sent.is_none() && idle >= ping_interval {
                        conn.ping_sent = Some(now);
                        let token = conn.itsname.clone().unwrap_or_else(|| conn.spec.host.clone());
                        let _ = self.send_line(server, &format!("PING :{token}"));
                    }
                }
                _ => {}
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let ping_interval = self.config.ping_interval();
        let ping_timeout = self.config.ping_timeout();
        let conns = self.registry.iter().filter_map(|(_, c)| match c.state {
            ConnState::Reconnect => c.reconnect_at,
            ConnState::Registering | ConnState::Syncing | ConnState::Active => match c.ping_sent {
                None => c.last_inbound.checked_add(ping_interval),
                Some(_) => c.last_inbound.checked_add(ping_timeout),
            },
            _ => None,
        });
        conns.chain(self.shutdown_at).min()
    }

    fn begin_shutdown(&mut self, reason: Option<String>) {
        if self.shutdown_at.is_some() {
            return;
        }
        tracing::info!("Shutting down");
        self.shutdown_at = Some(Instant::now() + SHUTDOWN_GRACE);
        for server in self.registry.refs() {
            let _ = self.disconnect(server, reason.as_deref());
        }
    }

    fn shutdown_complete(&self) -> bool {
        let Some(deadline) = self.shutdown_at else {
            return false;
        };
        Instant::now() >= deadline || !self.registry.iter().any(|(_, c)| c.state == ConnState::Closing)
    }

    // ── Outbound ──

    /// Queue a raw line on the server's link.
    pub fn send_line(&mut self, server: ServerRef, line: &str) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if conn.closing_requested && matches!(conn.state, ConnState::Closing | ConnState::Closed) {
            return Err(ClientError::Closed(server.refnum));
        }
        let Some(link) = conn.link.as_ref().filter(|l| l.can_send()) else {
            tracing::warn!(server = %server, "Dropping line for unconnected server");
            return Err(ClientError::NotConnected(server.refnum));
        };
        tracing::debug!(server = %server, "-> {line}");
        if link.send(Outbound::Line(line.to_string())) {
            Ok(())
        } else {
            Err(ClientError::NotConnected(server.refnum))
        }
    }

    fn message(&mut self, server: ServerRef, target: &str, text: &str, notice: bool) -> Result<(), ClientError> {
        let verb = if notice { "NOTICE" } else { "PRIVMSG" };
        self.send_line(server, &format!("{verb} {target} :{text}"))?;
        let Some(conn) = self.registry.get(server) else {
            return Ok(());
        };
        let me = conn.current_nick().to_string();
        let is_channel = conn.features.is_channel(target);
        let (level, line) = match (notice, is_channel) {
            (true, _) => (Levels::NOTICE, format!("-> -{target}- {text}")),
            (false, true) => (Levels::PUBLIC, format!("<{me}> {text}")),
            (false, false) => (Levels::MSG, format!("-> *{target}* {text}")),
        };
        self.display(server, Some(target), level, &line);
        Ok(())
    }

    /// Ask for a new nickname on the user's behalf. Never fudged.
    pub fn change_nick(&mut self, server: ServerRef, nick: &str) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if !conn.state.is_connected() {
            conn.desired_nick = nick.to_string();
            return Ok(());
        }
        conn.pending_nick = Some(PendingNick {
            nick: nick.to_string(),
            origin: NickOrigin::Explicit,
            previous: conn.nick.clone(),
        });
        conn.awaiting_nick = false;
        self.send_line(server, &format!("NICK {nick}"))
    }

    pub fn join(&mut self, server: ServerRef, channel: &str, key: Option<&str>) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if !conn.state.is_registered() {
            if !conn.rejoin.iter().any(|c| c.eq_ignore_ascii_case(channel)) {
                conn.rejoin.push(channel.to_string());
            }
            return Ok(());
        }
        conn.channels.mark_pending(channel, key);
        match key {
            Some(k) => self.send_line(server, &format!("JOIN {channel} {k}")),
            None => self.send_line(server, &format!("JOIN {channel}")),
        }
    }

    fn set_away(&mut self, server: ServerRef, message: Option<String>) -> Result<(), ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        conn.away = message.clone().filter(|m| !m.is_empty());
        if !conn.state.is_registered() {
            return Ok(());
        }
        match message.filter(|m| !m.is_empty()) {
            Some(m) => self.send_line(server, &format!("AWAY :{m}")),
            None => self.send_line(server, "AWAY"),
        }
    }

    fn connected_mut(&mut self, server: ServerRef) -> Result<&mut Connection, ClientError> {
        let conn = self
            .registry
            .get_mut(server)
            .ok_or(ClientError::NoSuchServer(server.refnum))?;
        if conn.closing_requested && matches!(conn.state, ConnState::Closing | ConnState::Closed) {
            return Err(ClientError::Closed(server.refnum));
        }
        if !conn.state.is_connected() || conn.state == ConnState::Closing {
            return Err(ClientError::NotConnected(server.refnum));
        }
        Ok(conn)
    }

    pub fn who(
        &mut self,
        server: ServerRef,
        request: WhoRequest,
        callback: Option<Callback<WhoReply>>,
    ) -> Result<(), ClientError> {
        let wire = self.connected_mut(server)?.who.request(request, callback);
        match wire {
            Some(wire) => self.send_line(server, &wire),
            None => Ok(()),
        }
    }

    pub fn ison(
        &mut self,
        server: ServerRef,
        nicks: &[String],
        callback: Option<Callback<IsonReply>>,
    ) -> Result<(), ClientError> {
        let wires = self.connected_mut(server)?.ison.request(nicks, callback);
        wires.iter().try_for_each(|w| self.send_line(server, w))
    }

    pub fn userhost(
        &mut self,
        server: ServerRef,
        nicks: &[String],
        callback: Option<Callback<UserhostInfo>>,
    ) -> Result<(), ClientError> {
        let wires = self
            .connected_mut(server)?
            .userhost
            .request(nicks, callback);
        wires.iter().try_for_each(|w| self.send_line(server, w))
    }

    fn flush(&mut self, server: ServerRef, waiter: FlushWaiter) {
        let Some(conn) = self.registry.get_mut(server) else {
            let _ = waiter.send(Err(ClientError::NoSuchServer(server.refnum)));
            return;
        };
        if conn.queues_empty() {
            let _ = waiter.send(Ok(()));
        } else {
            conn.flush_waiters.push(waiter);
        }
    }

    // ── Front end plumbing ──

    pub(crate) fn emit(&mut self, event: Event) {
        self.frontend.event(&event);
    }

    pub(crate) fn display(&mut self, server: ServerRef, target: Option<&str>, level: Levels, text: &str) {
        self.frontend.display(server, target, level, text);
    }

    pub(crate) fn display_notice(&mut self, server: ServerRef, text: &str) {
        self.frontend
            .display(server, None, Levels::CRAP, &format!("*** {text}"));
    }

    /// Offer a hook and apply whatever it asked for. The caller must
    /// re-check `server` before touching it again.
    pub(crate) fn offer_hook(&mut self, server: ServerRef, kind: HookKind, args: &[String]) -> bool {
        let mut ctl = Control::new();
        let claimed = self.frontend.hook(server, kind, args, &mut ctl);
        self.apply(ctl);
        claimed
    }

    pub(crate) fn apply(&mut self, mut ctl: Control) {
        for action in ctl.take() {
            let result = match action {
                Action::Send { server, line } => self.send_line(server, &line),
                Action::Connect(server) => self.connect(server),
                Action::Disconnect { server, reason } => self.disconnect(server, reason.as_deref()),
                Action::Delete(server) => self.delete(server),
                Action::ChangeNick { server, nick } => self.change_nick(server, &nick),
                Action::Ignore(rule) => {
                    self.ignores.add(rule);
                    Ok(())
                }
                Action::Unignore(mask) => {
                    self.ignores.remove(&mask);
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Hook action failed");
            }
        }
    }

    /// Show queue output, send promoted requests, and apply what the
    /// callbacks asked for.
    pub(crate) fn finish_query(&mut self, server: ServerRef, out: Outcome, ctl: Control) {
        for text in &out.display {
            self.display(server, None, Levels::CRAP, text);
        }
        for wire in &out.send {
            let _ = self.send_line(server, wire);
        }
        self.apply(ctl);
    }
}

/// Random jitter in `0..max` milliseconds.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}

#[cfg(test)]
impl Client {
    /// Attach a link whose outbound side the test holds, and register.
    pub(crate) fn attach_test_link(&mut self, server: ServerRef) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.next_session();
        if let Some(conn) = self.registry.get_mut(server) {
            conn.link = Some(Link::pending(session));
        }
        self.start_registration(server, tx);
        rx
    }

    fn io(&mut self, server: ServerRef, event: IoEvent) {
        let session = self
            .registry
            .get(server)
            .and_then(|c| c.session())
            .unwrap_or_default();
        self.on_io(IoMessage { server, session, event });
    }
}
