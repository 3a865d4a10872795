//! mergebot - CLI entry point

mod cli;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Merge ready branches into their declared destinations
#[derive(Parser, Debug)]
#[command(name = "mergebot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// WebSocket URL the server pushes events on (e.g. wss://server:7111/plug)
    #[arg(long)]
    websocket: String,

    /// Base URL of the server REST API (e.g. http://server:7178)
    #[arg(long)]
    restapi: String,

    /// API key used to register on the event server
    #[arg(long)]
    apikey: String,

    /// Bot name, also used to name its state files
    #[arg(long)]
    name: String,

    /// Path of the JSON configuration file
    #[arg(long)]
    config: PathBuf,

    /// Directory holding the branch queue and review store
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mergebot=info")),
        )
        .init();

    let cli = Cli::parse();

    let options = cli::RunOptions {
        websocket_url: cli.websocket,
        rest_api_url: cli.restapi,
        api_key: cli.apikey,
        bot_name: cli.name,
        config_path: cli.config,
        data_dir: cli.data_dir.unwrap_or_else(cli::default_data_dir),
    };

    cli::run_bot(options).await?;
    Ok(())
}
