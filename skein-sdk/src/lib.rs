//! # skein-sdk
//!
//! Protocol core for a multi-server IRC client.
//!
//! The core keeps any number of server connections, each moving through an
//! explicit lifecycle (see [`state::ConnState`]). Inbound lines are decoded,
//! routed through a two-phase dispatch (state update, then hook and
//! display), and gated against ignore rules and floods. WHO, ISON and
//! USERHOST requests are correlated with their replies through per-server
//! FIFO queues.
//!
//! Rendering, scripting and prompting belong to the front end, which plugs
//! in through the [`Frontend`] trait.
//!
//! ```no_run
//! use skein_sdk::{Client, ClientConfig, Frontend, Levels, ServerRef, ServerSpec};
//!
//! struct Stdout;
//! impl Frontend for Stdout {
//!     fn display(&mut self, server: ServerRef, target: Option<&str>, _level: Levels, text: &str) {
//!         println!("[{server}] {} {text}", target.unwrap_or("*"));
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (client, handle) = Client::new(ClientConfig::default(), Stdout);
//! tokio::spawn(client.run());
//! let server = handle.add_server(ServerSpec::from_addr("irc.libera.chat:6697")).await?;
//! handle.connect(server).await?;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod client;
pub mod config;
pub mod ctcp;
pub mod error;
pub mod event;
pub mod frontend;
pub mod gate;
pub mod isupport;
pub mod level;
pub mod line;
pub mod message;
pub mod nick;
pub mod numeric;
pub mod queue;
pub mod registry;
mod router;
pub mod state;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientHandle, ServerOp, ServerSummary};
pub use config::{ClientConfig, ServerSpec};
pub use error::ClientError;
pub use event::Event;
pub use frontend::{Control, Frontend, HookKind};
pub use level::Levels;
pub use registry::ServerRef;
pub use state::ConnState;
