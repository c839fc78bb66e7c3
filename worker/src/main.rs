use std::{path::PathBuf, process, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use comms::{
    channel::{HttpChannel, HttpChannelConfig},
    storage::HttpStorage,
    wallet::RemoteWallet,
};
use log::{error, info};
use tokio::signal;

use worker::{NodeConfig, WorkerBuilder, container::DockerRuntime};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(version, about = "GPU node agent for the AI job marketplace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the worker until interrupted.
    Serve {
        /// JSON env file holding the node configuration.
        #[arg(long, env = "NODE_CONFIG", default_value = "./env.json")]
        config: PathBuf,
    },
}

async fn serve(path: PathBuf) -> anyhow::Result<()> {
    let config = NodeConfig::load(&path)?;

    let wallet = Arc::new(
        RemoteWallet::connect(&config.signer_url, &config.eth_address)
            .await
            .context("connecting to the signer")?,
    );
    let channel = Arc::new(HttpChannel::new(
        HttpChannelConfig {
            database_url: config.database_url(),
            functions_url: config.functions_url(),
            auth_token: config.database_auth.clone(),
            eth_address: Some(config.eth_address.clone()),
            reconnect_delay: RECONNECT_DELAY,
        },
        wallet.clone(),
    ));
    let storage = Arc::new(HttpStorage::new(&config.storage_url())?);
    let runtime = Arc::new(DockerRuntime::connect().context("connecting to docker")?);

    let worker = WorkerBuilder::new(config)
        .runtime(runtime)
        .channel(channel)
        .storage(storage)
        .wallet(wallet)
        .build()?;

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            shutdown.cancel();
        }
    });

    worker.serve().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve { config } => serve(config).await,
    };

    if let Err(e) = result {
        error!("worker stopped: {e:#}");
        process::exit(1);
    }
}
