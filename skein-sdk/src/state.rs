//! Connection lifecycle states and per-connection state.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channels::ChannelTable;
use crate::config::{ClientConfig, ServerSpec};
use crate::error::ClientError;
use crate::gate::flood::FloodTracker;
use crate::isupport::FeatureTable;
use crate::nick::PendingNick;
use crate::queue::ison::IsonQueue;
use crate::queue::userhost::UserhostQueue;
use crate::queue::who::WhoQueue;
use crate::registry::ServerRef;
use crate::transport::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    Created,
    /// An attempt is scheduled.
    Reconnect,
    Dns,
    Connecting,
    TlsConnecting,
    /// Transport up, waiting for 001.
    Registering,
    /// 001 arrived; replaying saved session state.
    Syncing,
    Active,
    Eof,
    Error,
    /// QUIT queued, waiting for the writer to flush.
    Closing,
    Closed,
    Deleted,
}

impl ConnState {
    /// Whether a connection in this state owns a link.
    pub fn has_link(self) -> bool {
        !matches!(self, ConnState::Created | ConnState::Eof | ConnState::Closed | ConnState::Deleted)
    }

    /// An attempt is in flight or the link is live.
    pub fn is_busy(self) -> bool {
        !matches!(
            self,
            ConnState::Created | ConnState::Eof | ConnState::Error | ConnState::Closed | ConnState::Deleted
        )
    }

    /// Between transport up and teardown.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnState::Registering | ConnState::Syncing | ConnState::Active | ConnState::Closing
        )
    }

    pub fn is_registered(self) -> bool {
        matches!(self, ConnState::Syncing | ConnState::Active)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConnState::Created => "CREATED",
            ConnState::Reconnect => "RECONNECT",
            ConnState::Dns => "DNS",
            ConnState::Connecting => "CONNECTING",
            ConnState::TlsConnecting => "TLS_CONNECTING",
            ConnState::Registering => "REGISTERING",
            ConnState::Syncing => "SYNCING",
            ConnState::Active => "ACTIVE",
            ConnState::Eof => "EOF",
            ConnState::Error => "ERROR",
            ConnState::Closing => "CLOSING",
            ConnState::Closed => "CLOSED",
            ConnState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One session's I/O: the outbound channel and the tasks serving it.
#[derive(Debug)]
pub struct Link {
    pub session: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    /// A link reserved for an attempt that has not started yet.
    pub fn pending(session: u64) -> Self {
        Self {
            session,
            outbound: None,
            tasks: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn set_outbound(&mut self, tx: mpsc::UnboundedSender<Outbound>) {
        self.outbound = Some(tx);
    }

    pub fn can_send(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn send(&self, item: Outbound) -> bool {
        self.outbound.as_ref().is_some_and(|tx| tx.send(item).is_ok())
    }

    fn abort(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outbound = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.abort();
    }
}

pub type FlushWaiter = oneshot::Sender<Result<(), ClientError>>;

pub struct Connection {
    pub me: ServerRef,
    pub spec: ServerSpec,
    pub state: ConnState,
    /// The name the server calls itself (prefix of 001, or 004).
    pub itsname: Option<String>,
    pub link: Option<Link>,
    pub secure: bool,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,

    pub desired_nick: String,
    pub pending_nick: Option<PendingNick>,
    pub nick: Option<String>,
    pub nick_fudges: u32,
    /// The nick prompt came back empty; waiting for `/nick`.
    pub awaiting_nick: bool,
    pub umodes: BTreeSet<char>,
    pub features: FeatureTable,

    pub away: Option<String>,
    pub quit_message: Option<String>,
    /// Where the next attempt goes after this one fails; `None` is itself.
    pub reconnects_to: Option<ServerRef>,
    pub attempts: u32,
    pub reconnect_at: Option<Instant>,
    pub last_inbound: Instant,
    pub ping_sent: Option<Instant>,
    /// Channels to join once registered.
    pub rejoin: Vec<String>,
    /// Last ERROR/KILL text or transport failure.
    pub disconnect_reason: Option<String>,
    /// Set by an explicit disconnect; suppresses reconnection.
    pub closing_requested: bool,

    pub who: WhoQueue,
    pub ison: IsonQueue,
    pub userhost: UserhostQueue,
    pub channels: ChannelTable,
    pub flood: FloodTracker,
    pub flush_waiters: Vec<FlushWaiter>,
}

impl Connection {
    pub fn new(me: ServerRef, spec: ServerSpec, config: &ClientConfig) -> Self {
        Self {
            me,
            desired_nick: spec.nick.clone(),
            quit_message: spec.quit_message.clone(),
            umodes: BTreeSet::new(),
            spec,
            state: ConnState::Created,
            itsname: None,
            link: None,
            secure: false,
            local_addr: None,
            remote_addr: None,
            pending_nick: None,
            nick: None,
            nick_fudges: 0,
            awaiting_nick: false,
            features: FeatureTable::new(),
            away: None,
            reconnects_to: None,
            attempts: 0,
            reconnect_at: None,
            last_inbound: Instant::now(),
            ping_sent: None,
            rejoin: Vec::new(),
            disconnect_reason: None,
            closing_requested: false,
            who: WhoQueue::new(),
            ison: IsonQueue::new(config.ison_max_in_flight),
            userhost: UserhostQueue::new(config.userhost_max_in_flight),
            channels: ChannelTable::new(),
            flood: FloodTracker::new(config.flood.clone()),
            flush_waiters: Vec::new(),
        }
    }

    pub fn session(&self) -> Option<u64> {
        self.link.as_ref().map(|l| l.session)
    }

    /// The nick we go by: confirmed, else the one we are asking for.
    pub fn current_nick(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.pending_nick.as_ref().map(|p| p.nick.as_str()))
            .unwrap_or(&self.desired_nick)
    }

    pub fn is_me(&self, nick: &str) -> bool {
        let mapping = self.features.casemapping();
        self.nick.as_deref().is_some_and(|n| mapping.eq(n, nick))
    }

    /// Name for display and logs.
    pub fn label(&self) -> String {
        self.itsname.clone().unwrap_or_else(|| self.spec.addr())
    }

    pub fn queues_empty(&self) -> bool {
        self.who.is_empty() && self.ison.is_empty() && self.userhost.is_empty()
    }

    pub fn resolve_flush_waiters(&mut self) {
        if !self.queues_empty() {
            return;
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Drop the link and everything that only makes sense while it is up.
    /// Queue entries are dropped without callbacks; flush waiters fail.
    pub fn teardown(&mut self) {
        self.link = None;
        self.secure = false;
        self.ping_sent = None;
        self.pending_nick = None;
        self.awaiting_nick = false;
        let dropped = self.who.clear() + self.ison.clear() + self.userhost.clear();
        if dropped > 0 {
            tracing::debug!(server = %self.me, dropped, "Dropped pending queries");
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::NotConnected(self.me.refnum)));
        }
        self.flood.clear();
        self.channels.clear();
    }

    /// Start a fresh registration: per-session tables are not carried over.
    pub fn begin_registration(&mut self) {
        self.features.clear();
        self.channels.clear();
        self.umodes.clear();
        self.nick = None;
        self.nick_fudges = 0;
        self.itsname = None;
        self.disconnect_reason = None;
    }

    /// The link-presence invariant.
    pub fn link_consistent(&self) -> bool {
        self.link.is_some() == self.state.has_link()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_states() {
        for s in [ConnState::Created, ConnState::Eof, ConnState::Closed, ConnState::Deleted] {
            assert!(!s.has_link(), "{s}");
        }
        for s in [ConnState::Reconnect, ConnState::Dns, ConnState::Registering, ConnState::Active, ConnState::Closing] {
            assert!(s.has_link(), "{s}");
        }
        assert!(!ConnState::Error.is_busy());
        assert!(ConnState::Reconnect.is_busy());
    }

    #[tokio::test]
    async fn teardown_fails_flush_waiters() {
        let me = ServerRef { refnum: 3, generation: 1 };
        let mut conn = Connection::new(me, ServerSpec::default(), &ClientConfig::default());
        conn.link = Some(Link::pending(1));
        conn.who.request(crate::queue::who::WhoRequest::new("#c"), None);
        let (tx, rx) = oneshot::channel();
        conn.flush_waiters.push(tx);
        conn.resolve_flush_waiters();

        conn.teardown();
        assert!(conn.link.is_none());
        assert!(conn.queues_empty());
        assert!(matches!(rx.await, Ok(Err(ClientError::NotConnected(3)))));
    }
}
