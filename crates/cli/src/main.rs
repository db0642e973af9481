//! `shardkv`: operator shell for an in-process sharded key-value cluster.

use clap::Parser;
use cli::CliConfig;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    set_global_default(subscriber)?;

    config.run()
}
