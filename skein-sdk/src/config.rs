//! Configuration for the client core and for individual servers.
//!
//! Everything here deserializes with `serde` so front ends can load it from
//! whatever file format they like; missing fields take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gate::ignore::IgnoreRule;

/// How the server certificate is checked on TLS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVerify {
    /// Verify against the webpki and native root stores.
    #[default]
    Roots,
    /// Accept only a leaf certificate whose SHA-256 matches `ServerSpec::cert_pin`.
    Pinned,
    /// Skip verification entirely (self-signed test servers).
    Insecure,
}

/// One configured server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub tls_verify: TlsVerify,
    /// Hex SHA-256 of the expected leaf certificate (colons allowed).
    pub cert_pin: Option<String>,
    pub password: Option<String>,
    pub nick: String,
    pub username: String,
    pub realname: String,
    /// Local address to bind before connecting.
    pub vhost: Option<String>,
    /// Servers sharing a group are reconnect alternates for each other.
    pub group: Option<String>,
    /// User modes to request once registered, e.g. `+iw`.
    pub umodes: Option<String>,
    /// Channels to join once registered.
    pub autojoin: Vec<String>,
    pub quit_message: Option<String>,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6667,
            tls: false,
            tls_verify: TlsVerify::Roots,
            cert_pin: None,
            password: None,
            nick: "skein".to_string(),
            username: "skein".to_string(),
            realname: "skein IRC client".to_string(),
            vhost: None,
            group: None,
            umodes: None,
            autojoin: Vec::new(),
            quit_message: None,
        }
    }
}

impl ServerSpec {
    /// Parse `host[:port]`. TLS is switched on for port 6697, or with a
    /// leading `+` on the port (`irc.example.net:+6697`).
    pub fn from_addr(addr: &str) -> Self {
        let mut spec = Self::default();
        let (host, port) = match addr.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') || h.starts_with('[') => (h, Some(p)),
            _ => (addr, None),
        };
        spec.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        if let Some(port) = port {
            let (tls, digits) = match port.strip_prefix('+') {
                Some(d) => (true, d),
                None => (false, port),
            };
            if let Ok(p) = digits.parse() {
                spec.port = p;
            }
            spec.tls = tls || spec.port == 6697;
        }
        spec
    }

    /// `host:port` for display and logging.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Reconnection policy. Mirrors the exponential backoff the client used for
/// single connections, plus a ceiling on attempts per server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempts per server before it is skipped by the rotation.
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_secs: 2.0,
            max_delay_secs: 30.0,
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let secs = (self.initial_delay_secs * self.backoff_factor.powi(exp))
            .min(self.max_delay_secs)
            .max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Which part of the sender identifies a flood source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloodMask {
    /// The whole `nick!user@host`.
    #[default]
    Full,
    /// `user@host`; catches nick-hopping.
    UserHost,
    /// Host only; catches clone floods from one machine.
    Host,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub enabled: bool,
    /// Messages in one window before the rate is even considered.
    pub threshold: u32,
    /// Messages per second at or above which a window is a flood.
    pub rate: f64,
    /// Ring size: distinct senders tracked per connection.
    pub slots: usize,
    pub mask: FloodMask,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            rate: 3.0,
            slots: 8,
            mask: FloodMask::Full,
        }
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub flood: FloodConfig,
    pub ignores: Vec<IgnoreRule>,
    /// Mutate a colliding automatic nickname instead of prompting.
    pub auto_fudge_nick: bool,
    /// Fudge attempts before falling back to the prompt.
    pub max_nick_fudges: u32,
    /// Dispatched ISON requests per connection.
    pub ison_max_in_flight: usize,
    /// Dispatched USERHOST requests per connection.
    pub userhost_max_in_flight: usize,
    /// Inbound silence before we PING the server.
    pub ping_interval_secs: u64,
    /// Inbound silence before the connection is declared dead.
    pub ping_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Answer CTCP VERSION/PING/TIME/CLIENTINFO.
    pub ctcp_replies: bool,
    pub version_reply: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            flood: FloodConfig::default(),
            ignores: Vec::new(),
            auto_fudge_nick: true,
            max_nick_fudges: 9,
            ison_max_in_flight: 1,
            userhost_max_in_flight: 1,
            ping_interval_secs: 90,
            ping_timeout_secs: 240,
            connect_timeout_secs: 30,
            ctcp_replies: true,
            version_reply: concat!("skein ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_parsing() {
        let s = ServerSpec::from_addr("irc.example.net");
        assert_eq!((s.host.as_str(), s.port, s.tls), ("irc.example.net", 6667, false));
        let s = ServerSpec::from_addr("irc.example.net:6697");
        assert_eq!((s.port, s.tls), (6697, true));
        let s = ServerSpec::from_addr("irc.example.net:+7000");
        assert_eq!((s.port, s.tls), (7000, true));
        let s = ServerSpec::from_addr("[::1]:6667");
        assert_eq!((s.host.as_str(), s.port), ("::1", 6667));
        assert_eq!(s.addr(), "[::1]:6667");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let r = ReconnectConfig::default();
        assert_eq!(r.delay_for(1), Duration::from_secs(2));
        assert_eq!(r.delay_for(2), Duration::from_secs(4));
        assert_eq!(r.delay_for(3), Duration::from_secs(8));
        assert_eq!(r.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn unbounded_backoff_saturates() {
        let r = ReconnectConfig {
            initial_delay_secs: 1e300,
            max_delay_secs: f64::INFINITY,
            ..ReconnectConfig::default()
        };
        assert_eq!(r.delay_for(1), Duration::MAX);
        assert_eq!(r.delay_for(5), Duration::MAX);
    }
}
