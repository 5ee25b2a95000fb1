//! Beacon server entry point.

use anyhow::Result;
use beacon_server::{AppConfig, Application, WatchPlan};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Beacon real-time distribution server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via BEACON_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default)
    Serve,
    /// Connect as a client and log events from the given channels
    Watch {
        /// Server endpoint; defaults to `[client].url`
        #[arg(long)]
        url: Option<String>,
        /// Identity to authenticate with
        #[arg(long)]
        identity: Option<String>,
        /// Chain id to follow (repeatable)
        #[arg(long = "chain")]
        chains: Vec<u64>,
        /// Token address to follow prices for (repeatable)
        #[arg(long = "price")]
        prices: Vec<String>,
        /// Address to follow transactions for (repeatable)
        #[arg(long = "transactions")]
        transactions: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connection.
    beacon_ws::init_crypto();

    let args = Args::parse();
    beacon_telemetry::init_logging()?;

    info!("Starting Beacon v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > BEACON_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("BEACON_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::from_file(&config_path)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                bind = %config.server.bind,
                port = config.server.port,
                "Configuration loaded"
            );
            let app = Application::new(config).await?;
            app.run().await?;
        }
        Command::Watch {
            url,
            identity,
            chains,
            prices,
            transactions,
        } => {
            let mut client = config.client;
            if let Some(url) = url {
                client.url = url;
            }
            let plan = WatchPlan {
                identity,
                chains,
                prices,
                transactions,
            };

            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown signal received");
                    }
                    shutdown.cancel();
                }
            });
            beacon_server::watch(client, plan, shutdown).await?;
        }
    }

    Ok(())
}
