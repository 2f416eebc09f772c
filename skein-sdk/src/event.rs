//! Lifecycle events the core reports to the front end.

use std::net::SocketAddr;
use std::time::Duration;

use crate::registry::ServerRef;
use crate::state::ConnState;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A connection moved between lifecycle states.
    StateChanged {
        server: ServerRef,
        from: ConnState,
        to: ConnState,
    },

    /// Transport is up (TCP, plus TLS when `secure`). Registration follows.
    Connected {
        server: ServerRef,
        remote: SocketAddr,
        secure: bool,
    },

    /// Registration complete. `nick` is our confirmed nick.
    Registered { server: ServerRef, nick: String },

    /// Our own nickname changed.
    NickChanged {
        server: ServerRef,
        old: Option<String>,
        new: String,
    },

    /// We joined a channel.
    Joined { server: ServerRef, channel: String },

    /// We left a channel, by PART or KICK.
    Parted { server: ServerRef, channel: String },

    /// The link went away. `reason` is the last ERROR/KILL text or the
    /// transport failure.
    Disconnected { server: ServerRef, reason: String },

    /// A reconnect attempt was scheduled on `server` after `failed` lost
    /// its link.
    ReconnectScheduled {
        server: ServerRef,
        failed: ServerRef,
        attempt: u32,
        delay: Duration,
    },

    /// No server in the group was eligible for another attempt.
    GaveUp { server: ServerRef, reason: String },

    /// The server told us to use another one (numeric 010).
    Redirected {
        from: ServerRef,
        to: ServerRef,
        host: String,
        port: u16,
    },

    /// The connection was deleted; its handle no longer resolves.
    Deleted { server: ServerRef },
}
