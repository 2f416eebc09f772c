//! Carry out typed commands against the running client.

use anyhow::{Context, Result, bail};
use skein_sdk::gate::ignore::IgnoreRule;
use skein_sdk::queue::who::WhoRequest;
use skein_sdk::{ClientHandle, ServerRef, ServerSpec};

use crate::input::{HELP, Input};

/// What the prompt is pointed at.
#[derive(Debug, Clone)]
pub struct Session {
    pub server: Option<ServerRef>,
    pub target: Option<String>,
    /// Template for servers added with /connect.
    pub template: ServerSpec,
}

pub enum Flow {
    Continue,
    Quit(Option<String>),
}

impl Session {
    pub fn new(server: Option<ServerRef>, template: ServerSpec) -> Self {
        Self {
            server,
            target: None,
            template,
        }
    }

    fn server(&self) -> Result<ServerRef> {
        self.server.context("no current server (try /connect host:port)")
    }

    fn target(&self) -> Result<&str> {
        self.target
            .as_deref()
            .context("no current target (try /join or /query)")
    }

    pub async fn execute(&mut self, handle: &ClientHandle, input: Input) -> Result<Flow> {
        match input {
            Input::Say(text) => {
                let server = self.server()?;
                handle.privmsg(server, self.target()?, &text).await?;
            }
            Input::Me(text) => {
                let server = self.server()?;
                handle
                    .privmsg(server, self.target()?, &format!("\x01ACTION {text}\x01"))
                    .await?;
            }
            Input::Msg { target, text } => handle.privmsg(self.server()?, &target, &text).await?,
            Input::Notice { target, text } => handle.notice(self.server()?, &target, &text).await?,
            Input::Query(target) => {
                println!("*** Talking to {target}");
                self.target = Some(target);
            }
            Input::Join { channel, key } => {
                handle.join(self.server()?, &channel, key.as_deref()).await?;
                self.target = Some(channel);
            }
            Input::Part { channel, reason } => {
                let channel = match channel {
                    Some(c) => c,
                    None => self.target()?.to_string(),
                };
                handle.part(self.server()?, &channel, reason.as_deref()).await?;
                if self.target.as_deref() == Some(channel.as_str()) {
                    self.target = None;
                }
            }
            Input::Nick(nick) => handle.nick(self.server()?, &nick).await?,
            Input::Away(message) => handle.away(self.server()?, message.as_deref()).await?,
            Input::Who { target, whox } => {
                let mut request = WhoRequest::new(&target);
                if let Some(fields) = whox {
                    request = request.with_whox(&fields);
                }
                handle.who(self.server()?, request, None).await?;
            }
            Input::Ison(nicks) => handle.ison(self.server()?, nicks, None).await?,
            Input::Userhost(nicks) => handle.userhost(self.server()?, nicks, None).await?,
            Input::Quote(line) => handle.raw(self.server()?, &line).await?,
            Input::Ignore { mask, levels } => {
                handle.ignore(IgnoreRule::new(&mask, levels)).await?;
                println!("*** Ignoring {mask} ({})", levels.names());
            }
            Input::Unignore(mask) => handle.unignore(&mask).await?,
            Input::Connect(None) => handle.connect(self.server()?).await?,
            Input::Connect(Some(addr)) => {
                let fresh = ServerSpec::from_addr(&addr);
                let spec = ServerSpec {
                    host: fresh.host,
                    port: fresh.port,
                    tls: fresh.tls,
                    group: None,
                    autojoin: Vec::new(),
                    ..self.template.clone()
                };
                let server = handle.add_server(spec).await?;
                handle.connect(server).await?;
                self.server = Some(server);
                self.target = None;
            }
            Input::Disconnect(reason) => handle.disconnect(self.server()?, reason.as_deref()).await?,
            Input::Server(refnum) => {
                let listing = handle.servers().await?;
                let Some(found) = listing.iter().find(|s| s.server.refnum == refnum) else {
                    bail!("no server {refnum}");
                };
                println!("*** Current server is {} ({})", found.server, found.addr);
                self.server = Some(found.server);
                self.target = None;
            }
            Input::Servers => {
                for s in handle.servers().await? {
                    let mark = if Some(s.server) == self.server { '*' } else { ' ' };
                    println!(
                        "{mark}[{}] {} {} {}{}",
                        s.server,
                        s.addr,
                        s.state,
                        s.nick.as_deref().unwrap_or("-"),
                        if s.secure { " (tls)" } else { "" }
                    );
                }
            }
            Input::Flush => {
                handle.flush(self.server()?).await?;
                println!("*** Queues drained");
            }
            Input::Help => println!("{HELP}"),
            Input::Quit(reason) => return Ok(Flow::Quit(reason)),
        }
        Ok(Flow::Continue)
    }
}
