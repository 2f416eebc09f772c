//! skein: a line-mode IRC client.
//!
//! Reads commands from stdin and prints everything the client shows on
//! stdout. Logs go to stderr (`RUST_LOG`, or JSON with `SKEIN_LOG_JSON=1`).

mod config;
mod frontend;
mod input;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use skein_sdk::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Resolved};
use crate::frontend::Terminal;
use crate::session::{Flow, Session};

#[derive(Parser, Debug)]
#[command(name = "skein", about = "Line-mode IRC client")]
struct Cli {
    /// Server address (host:port, `+port` for TLS)
    #[arg(long)]
    server: Option<String>,

    /// IRC nickname
    #[arg(long)]
    nick: Option<String>,

    /// Use TLS (implied by port 6697)
    #[arg(long)]
    tls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    tls_insecure: bool,

    /// Channels to join, comma-separated
    #[arg(long, value_delimiter = ',')]
    channels: Option<Vec<String>>,

    /// Config file (default: ~/.config/skein/config.toml)
    #[arg(long, env = "SKEIN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("SKEIN_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "skein=info,skein_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());
    let resolved = Resolved::merge(&cli, &config);

    let (client, handle) = Client::new(resolved.client.clone(), Terminal::new(resolved.alt_nicks.clone()));
    let core = tokio::spawn(client.run());

    let mut first = None;
    for spec in &resolved.servers {
        tracing::info!(server = %spec.addr(), nick = %spec.nick, tls = spec.tls, "Adding server");
        let server = handle.add_server(spec.clone()).await?;
        handle.connect(server).await?;
        first.get_or_insert(server);
    }
    let template = resolved.servers.first().cloned().unwrap_or_default();
    let mut session = Session::new(first, template);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let reason = loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break None,
        };
        let Some(line) = line else {
            break None;
        };
        let input = match input::parse(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                println!("*** {e}");
                continue;
            }
        };
        match session.execute(&handle, input).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit(reason)) => break reason,
            Err(e) => println!("*** {e}"),
        }
    };

    handle.shutdown(reason.as_deref()).await?;
    core.await??;
    Ok(())
}
