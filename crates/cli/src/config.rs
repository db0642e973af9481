//! Command-line configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use coordination::{ClusterPaths, MemoryCoordination};
use coordinator::{Coordinator, CoordinatorConfig, LocalLauncher, MachinePool};
use corelib::PlacementPolicy;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::commands::{Command, CommandResult, Shell};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Placement {
    /// Position = hash of `host:port`.
    Hashed,
    /// Each joining server splits the widest range in half.
    EvenSplit,
}

impl From<Placement> for PlacementPolicy {
    fn from(placement: Placement) -> Self {
        match placement {
            Placement::Hashed => PlacementPolicy::Hashed,
            Placement::EvenSplit => PlacementPolicy::EvenSplit,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "shardkv", version, about = "Operator shell for a sharded key-value cluster")]
pub struct CliConfig {
    /// Machine pool file, one `name host port` per line.
    #[arg(long)]
    pub pool: Option<PathBuf>,

    /// Size of the generated local pool when no pool file is given.
    #[arg(long, default_value_t = 8)]
    pub machines: usize,

    /// First port of the generated local pool.
    #[arg(long, default_value_t = 50000)]
    pub first_port: u16,

    /// Root path of the cluster in the coordination service.
    #[arg(long, default_value = "/shardkv")]
    pub root: String,

    #[arg(long, value_enum, default_value_t = Placement::Hashed)]
    pub placement: Placement,

    /// Bound on waits for server registrations and acknowledgements.
    #[arg(long, default_value_t = 10_000)]
    pub await_timeout_ms: u64,

    /// Pause after launching servers before looking for them.
    #[arg(long, default_value_t = 100)]
    pub launch_grace_ms: u64,

    /// Keep server data in JSON files under this directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

impl CliConfig {
    pub fn machine_pool(&self) -> anyhow::Result<MachinePool> {
        match &self.pool {
            Some(path) => MachinePool::load(path)
                .with_context(|| format!("loading machine pool {}", path.display())),
            None => Ok(MachinePool::localhost(self.machines, self.first_port)),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            paths: ClusterPaths::new(self.root.clone()),
            placement: self.placement.into(),
            await_timeout: Duration::from_millis(self.await_timeout_ms),
            launch_grace: Duration::from_millis(self.launch_grace_ms),
        }
    }

    pub fn run(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> anyhow::Result<()> {
        let pool = self.machine_pool()?;
        let config = self.coordinator_config();
        let ensemble = MemoryCoordination::new();
        let mut launcher = LocalLauncher::new(ensemble.clone(), config.paths.clone());
        if let Some(dir) = &self.data_dir {
            launcher = launcher.with_data_dir(dir);
        }
        let launcher = Arc::new(launcher);
        info!(machines = pool.len(), root = %self.root, "coordinator starting");
        let (coordinator, _task) = Coordinator::spawn(
            config,
            pool,
            launcher.clone(),
            Arc::new(ensemble.connect()),
        );
        let mut shell = Shell::new(coordinator, launcher);

        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            stdout.write_all(b"shardkv> ").await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(err) => {
                    stdout.write_all(format!("error: {err}\n").as_bytes()).await?;
                    continue;
                }
            };
            match shell.execute(command).await {
                Ok(CommandResult::Output(text)) => {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Ok(CommandResult::Quit) => break,
                Err(err) => {
                    stdout.write_all(format!("error: {err:#}\n").as_bytes()).await?;
                }
            }
        }
        shell.close().await
    }
}
