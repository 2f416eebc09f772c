//! Per-connection I/O tasks.
//!
//! Nothing here touches connection state. The connector, reader and writer
//! tasks report to the client loop over one channel, every event tagged
//! with the server and the session it belongs to. The loop drops events
//! from a session it has already torn down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::error::TransportError;
use crate::line::{LineBuffer, frame};
use crate::registry::ServerRef;
use crate::state::ConnState;

/// A connected stream, before it is split into reader and writer halves.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Plain(_) => f.write_str("Stream::Plain"),
            Stream::Tls(_) => f.write_str("Stream::Tls"),
        }
    }
}

#[derive(Debug)]
pub enum IoEvent {
    /// The connector moved to a new phase (DNS, CONNECTING, TLS_CONNECTING).
    Progress(ConnState),
    Connected {
        stream: Stream,
        local: Option<SocketAddr>,
        remote: SocketAddr,
    },
    ConnectFailed(TransportError),
    Line(String),
    Eof,
    ReadError(std::io::Error),
    WriteError(std::io::Error),
    /// The writer flushed a graceful close.
    Closed,
}

#[derive(Debug)]
pub struct IoMessage {
    pub server: ServerRef,
    pub session: u64,
    pub event: IoEvent,
}

pub type IoSender = mpsc::UnboundedSender<IoMessage>;

/// What the writer task accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    /// Flush what is queued, shut the socket down and report `Closed`.
    Close,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    /// Local address or hostname to bind before connecting.
    pub vhost: Option<String>,
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub timeout: Duration,
}

/// Tags events for one server session.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: IoSender,
    server: ServerRef,
    session: u64,
}

impl Reporter {
    pub fn new(tx: IoSender, server: ServerRef, session: u64) -> Self {
        Self { tx, server, session }
    }

    /// Returns `false` once the client loop is gone.
    fn send(&self, event: IoEvent) -> bool {
        self.tx
            .send(IoMessage {
                server: self.server,
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Spawn the connector task for one attempt.
pub fn spawn_connect(target: ConnectTarget, reporter: Reporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = match connect(&target, &reporter).await {
            Ok((stream, local, remote)) => IoEvent::Connected { stream, local, remote },
            Err(e) => IoEvent::ConnectFailed(e),
        };
        reporter.send(event);
    })
}

async fn connect(
    target: &ConnectTarget,
    reporter: &Reporter,
) -> Result<(Stream, Option<SocketAddr>, SocketAddr), TransportError> {
    reporter.send(IoEvent::Progress(ConnState::Dns));
    tracing::debug!(server = %reporter.server, "Resolving {}...", target.host);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: target.host.clone(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::NoAddress {
            host: target.host.clone(),
        });
    }

    let bind = match &target.vhost {
        Some(vhost) => resolve_vhost(vhost).await?,
        None => Vec::new(),
    };

    reporter.send(IoEvent::Progress(ConnState::Connecting));
    let mut last_err = None;
    let mut tcp = None;
    for addr in &addrs {
        match connect_one(*addr, &bind, target.timeout).await {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                tracing::debug!(server = %reporter.server, %addr, error = %e, "Address failed");
                last_err = Some(e);
            }
        }
    }
    let tcp = match (tcp, last_err) {
        (Some(tcp), _) => tcp,
        (None, Some(e)) => return Err(e),
        (None, None) => {
            return Err(TransportError::NoAddress {
                host: target.host.clone(),
            });
        }
    };
    let remote = tcp.peer_addr()?;
    let local = tcp.local_addr().ok();
    let _ = tcp.set_nodelay(true);
    tracing::debug!(server = %reporter.server, %remote, "TCP connected");

    let Some(tls) = &target.tls else {
        return Ok((Stream::Plain(tcp), local, remote));
    };
    reporter.send(IoEvent::Progress(ConnState::TlsConnecting));
    let name = crate::tls::server_name(&target.host)?;
    let connector = TlsConnector::from(tls.clone());
    let stream = tokio::time::timeout(target.timeout, connector.connect(name, tcp))
        .await
        .map_err(|_| TransportError::Timeout {
            addr: remote.to_string(),
        })?
        .map_err(|source| TransportError::TlsHandshake {
            host: target.host.clone(),
            source,
        })?;
    tracing::debug!(server = %reporter.server, "TLS handshake complete");
    Ok((Stream::Tls(Box::new(stream)), local, remote))
}

async fn resolve_vhost(vhost: &str) -> Result<Vec<SocketAddr>, TransportError> {
    if let Ok(ip) = vhost.parse::<std::net::IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, 0)]);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((vhost, 0))
        .await
        .map_err(|source| TransportError::Resolve {
            host: vhost.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::NoAddress { host: vhost.to_string() });
    }
    Ok(addrs)
}

async fn connect_one(addr: SocketAddr, bind: &[SocketAddr], timeout: Duration) -> Result<TcpStream, TransportError> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    if !bind.is_empty() {
        let Some(local) = bind.iter().find(|b| b.is_ipv4() == addr.is_ipv4()) else {
            return Err(TransportError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no vhost address of this family"),
            });
        };
        socket.bind(*local)?;
    }
    match tokio::time::timeout(timeout, socket.connect(addr)).await {
        Err(_) => Err(TransportError::Timeout { addr: addr.to_string() }),
        Ok(Err(source)) => Err(TransportError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Ok(Ok(stream)) => Ok(stream),
    }
}

/// Split a connected stream and spawn its reader and writer tasks.
pub fn spawn_io(stream: Stream, reporter: Reporter, outbound: mpsc::UnboundedReceiver<Outbound>) -> [JoinHandle<()>; 2] {
    match stream {
        Stream::Plain(tcp) => spawn_halves(tcp, reporter, outbound),
        Stream::Tls(tls) => spawn_halves(*tls, reporter, outbound),
    }
}

fn spawn_halves<S>(stream: S, reporter: Reporter, outbound: mpsc::UnboundedReceiver<Outbound>) -> [JoinHandle<()>; 2]
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let reader = tokio::spawn(read_loop(reader, reporter.clone()));
    let writer = tokio::spawn(write_loop(writer, reporter, outbound));
    [reader, writer]
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, reporter: Reporter) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                reporter.send(IoEvent::Eof);
                return;
            }
            Ok(n) => {
                for line in lines.extend(&buf[..n]) {
                    if !reporter.send(IoEvent::Line(line)) {
                        return;
                    }
                }
            }
            Err(e) => {
                reporter.send(IoEvent::ReadError(e));
                return;
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, reporter: Reporter, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        let result = match item {
            Outbound::Line(line) => {
                let framed = frame(&line);
                writer.write_all(framed.as_bytes()).await
            }
            Outbound::Close => {
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
                reporter.send(IoEvent::Closed);
                return;
            }
        };
        if let Err(e) = result {
            reporter.send(IoEvent::WriteError(e));
            return;
        }
    }
}
