//! Error types.

use thiserror::Error;

/// Failures while establishing or running a connection's transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{host} resolved to no usable address")]
    NoAddress { host: String },
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out")]
    Timeout { addr: String },
    #[error("TLS handshake with {host} failed: {source}")]
    TlsHandshake {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
    #[error("bad TLS settings: {0}")]
    TlsConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the failure happened during the TLS handshake, as opposed
    /// to name resolution, TCP or later I/O.
    pub fn is_tls_handshake(&self) -> bool {
        matches!(self, TransportError::TlsHandshake { .. })
    }
}

/// Errors returned to front ends driving the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("no such server (refnum {0})")]
    NoSuchServer(u32),
    #[error("server {0} is not connected")]
    NotConnected(u32),
    #[error("server {0} was closed")]
    Closed(u32),
    #[error("client is shutting down")]
    Shutdown,
}
