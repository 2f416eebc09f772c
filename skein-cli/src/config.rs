//! Persistent configuration for the skein CLI.
//!
//! Config file lives at `~/.config/skein/config.toml`. Besides the quick
//! top-level keys it may carry a `[client]` table (core settings) and any
//! number of `[[servers]]` tables, each a full server definition.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skein_sdk::config::TlsVerify;
use skein_sdk::{ClientConfig, ServerSpec};

/// Server used when nothing else names one.
pub const DEFAULT_SERVER: &str = "irc.libera.chat:6697";

/// User configuration (config.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server address (host:port).
    pub server: Option<String>,
    pub nick: Option<String>,
    /// Offered in order when the server refuses our nick.
    pub alt_nicks: Option<Vec<String>>,
    /// Force TLS (auto-detected from :6697).
    pub tls: Option<bool>,
    /// Skip TLS certificate verification.
    pub tls_insecure: Option<bool>,
    /// Channels to join once registered.
    pub channels: Option<Vec<String>>,
    pub quit_message: Option<String>,
    /// Additional servers, connected alongside the main one.
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    #[serde(default)]
    pub client: ClientConfig,
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skein")
        .join("config.toml")
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load `path` (or the default location). A missing file is an empty
    /// config; a broken one is reported and ignored.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(s) => match Self::from_toml(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }
}

/// The effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub servers: Vec<ServerSpec>,
    pub alt_nicks: Vec<String>,
    pub client: ClientConfig,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let nick = cli
            .nick
            .clone()
            .or_else(|| config.nick.clone())
            .unwrap_or_else(|| whoami::fallible::username().unwrap_or_else(|_| "guest".to_string()));

        let named = cli.server.clone().or_else(|| config.server.clone());
        let mut servers = Vec::new();
        if named.is_some() || config.servers.is_empty() {
            let addr = named.unwrap_or_else(|| DEFAULT_SERVER.to_string());
            let mut spec = ServerSpec::from_addr(&addr);
            spec.tls |= cli.tls || config.tls.unwrap_or(false);
            if cli.tls_insecure || config.tls_insecure.unwrap_or(false) {
                spec.tls_verify = TlsVerify::Insecure;
            }
            spec.nick = nick.clone();
            spec.username = nick.clone();
            spec.autojoin = cli
                .channels
                .clone()
                .or_else(|| config.channels.clone())
                .unwrap_or_default();
            spec.quit_message = config.quit_message.clone();
            servers.push(spec);
        }

        // Extra servers inherit the nick unless they set their own.
        let stock = ServerSpec::default();
        for spec in &config.servers {
            let mut spec = spec.clone();
            if spec.nick == stock.nick {
                spec.nick = nick.clone();
            }
            if spec.username == stock.username {
                spec.username = spec.nick.clone();
            }
            if spec.quit_message.is_none() {
                spec.quit_message = config.quit_message.clone();
            }
            servers.push(spec);
        }

        Self {
            servers,
            alt_nicks: config.alt_nicks.clone().unwrap_or_default(),
            client: config.client.clone(),
        }
    }
}
