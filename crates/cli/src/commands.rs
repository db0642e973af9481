//! Shell commands and their execution against a running coordinator.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use client::ClientRouter;
use coordinator::{Coordinator, LocalLauncher};
use corelib::CacheStrategy;
use protocol::KvMessage;
use tracing::{info, warn};

const HELP: &str = "\
addnode <count> <cacheStrategy> <cacheSize>   add servers (alias: addnodes)
start                                         let servers accept clients
stop                                          make servers reject clients
shutdown                                      stop and remove every server
removenode <name|name:host:port>...           planned removal of servers
status                                        show every machine's status
kill <name>                                   crash a server without notice
put <key> [value]                             store a value; no value deletes
get <key>                                     read a value
help                                          show this text
quit                                          shut the cluster down and exit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    AddNodes {
        count: usize,
        cache_strategy: CacheStrategy,
        cache_size: usize,
    },
    Start,
    Stop,
    Shutdown,
    RemoveNodes(Vec<String>),
    Status,
    Kill(String),
    Put {
        key: String,
        value: String,
    },
    Get(String),
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    Output(String),
    Quit,
}

impl Command {
    /// Parse one shell line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
        let line = line.trim();
        let Some((word, rest)) = split_word(line) else {
            return Ok(None);
        };
        let args: Vec<&str> = rest.split_whitespace().collect();
        let command = match word.to_ascii_lowercase().as_str() {
            "addnode" | "addnodes" => {
                let [count, strategy, size] = args[..] else {
                    bail!("usage: addnode <count> <cacheStrategy> <cacheSize>");
                };
                Command::AddNodes {
                    count: count.parse().context("count must be a number")?,
                    cache_strategy: strategy.parse()?,
                    cache_size: size.parse().context("cache size must be a number")?,
                }
            }
            "start" => no_args(Command::Start, &args)?,
            "stop" => no_args(Command::Stop, &args)?,
            "shutdown" => no_args(Command::Shutdown, &args)?,
            "status" => no_args(Command::Status, &args)?,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "removenode" | "removenodes" => {
                if args.is_empty() {
                    bail!("usage: removenode <name:host:port>...");
                }
                Command::RemoveNodes(args.iter().map(|s| s.to_string()).collect())
            }
            "kill" => {
                let [name] = args[..] else {
                    bail!("usage: kill <name>");
                };
                Command::Kill(name.to_string())
            }
            "get" => {
                let [key] = args[..] else {
                    bail!("usage: get <key>");
                };
                Command::Get(key.to_string())
            }
            "put" => {
                let Some((key, value)) = split_word(rest) else {
                    bail!("usage: put <key> [value]");
                };
                Command::Put {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            other => bail!("unknown command {other:?}, try help"),
        };
        Ok(Some(command))
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    })
}

fn no_args(command: Command, args: &[&str]) -> anyhow::Result<Command> {
    if !args.is_empty() {
        bail!("{} takes no arguments", format!("{command:?}").to_ascii_lowercase());
    }
    Ok(command)
}

/// Executes commands for one operator session.
pub struct Shell {
    coordinator: Coordinator,
    launcher: Arc<LocalLauncher>,
    client: Option<ClientRouter>,
}

impl Shell {
    pub fn new(coordinator: Coordinator, launcher: Arc<LocalLauncher>) -> Self {
        Self {
            coordinator,
            launcher,
            client: None,
        }
    }

    pub async fn execute(&mut self, command: Command) -> anyhow::Result<CommandResult> {
        let output = match command {
            Command::AddNodes {
                count,
                cache_strategy,
                cache_size,
            } => {
                let added = self
                    .coordinator
                    .add_nodes(count, cache_strategy, cache_size)
                    .await?;
                format!("added {}", added.join(", "))
            }
            Command::Start => {
                let started = self.coordinator.start().await?;
                format!("{started} server(s) started")
            }
            Command::Stop => {
                let stopped = self.coordinator.stop().await?;
                format!("{stopped} server(s) stopped")
            }
            Command::Shutdown => {
                self.drop_client().await;
                self.coordinator.shutdown().await?;
                "cluster shut down".to_string()
            }
            Command::RemoveNodes(servers) => {
                let removed = self.coordinator.remove_nodes(servers).await?;
                format!("removed {}", removed.join(", "))
            }
            Command::Status => self.status().await?,
            Command::Kill(server) => {
                let name = server.split(':').next().unwrap_or(&server);
                self.launcher.kill(name)?;
                format!("killed {name}")
            }
            Command::Put { key, value } => {
                let client = self.client().await?;
                let reply = if value.is_empty() {
                    client.delete(&key).await?
                } else {
                    client.put(&key, &value).await?
                };
                describe(&reply)
            }
            Command::Get(key) => {
                let reply = self.client().await?.get(&key).await?;
                describe(&reply)
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(CommandResult::Quit),
        };
        Ok(CommandResult::Output(output))
    }

    /// Drop the client connection and shut down whatever is still running.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.drop_client().await;
        let status = self.coordinator.status().await?;
        if status.values().any(|s| s.is_active()) {
            info!("shutting down cluster");
            self.coordinator.shutdown().await?;
        }
        Ok(())
    }

    async fn status(&self) -> anyhow::Result<String> {
        let status = self.coordinator.status().await?;
        let mut output = String::new();
        for (label, state) in &status {
            writeln!(output, "{label:<32} {state}")?;
        }
        let metadata = self.coordinator.metadata().await?;
        for entry in metadata.entries() {
            writeln!(output, "{:<32} {}", entry.address(), entry.range)?;
        }
        Ok(output.trim_end().to_string())
    }

    /// Connect on first use to any server in the current metadata.
    async fn client(&mut self) -> anyhow::Result<&mut ClientRouter> {
        let metadata = self.coordinator.metadata().await?;
        if self.client.is_none() {
            let address = metadata
                .addresses()
                .next()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("no servers in the cluster"))?;
            let router = ClientRouter::connect(&address).await?;
            self.client = Some(router);
        }
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| anyhow!("not connected"))?;
        client.set_metadata(metadata);
        Ok(client)
    }

    async fn drop_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(err) = client.disconnect().await {
                warn!(error = %err, "disconnect failed");
            }
        }
    }
}

fn describe(reply: &KvMessage) -> String {
    if reply.value.is_empty() {
        format!("{} {}", reply.status, reply.key)
    } else {
        format!("{} {} {}", reply.status, reply.key, reply.value)
    }
}
