use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_ingest::explorer::ExplorerClient;
use tally_ingest::rpc::RpcClient;
use tally_ingest::seed::{seed_collaterals, seed_networks};
use tally_ingest::{BlocksSync, EventsSync, IngestError, PricesSync};
use tally_points::{Driver, PointsError};
use tally_store::Store;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tally", about = "Off-chain points indexer for restaking networks")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "tally.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and continuously ingest and accrue points.
    Daemon,
    /// Run one ingest + points pass and exit.
    Sync,
    /// Serve the read-only API without ingesting.
    Serve,
    /// Seed collateral metadata and network points parameters.
    Seed,
}

struct App {
    config: Config,
    store: Store,
    rpc: RpcClient,
    explorer: ExplorerClient,
}

impl App {
    fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::open(&config.store_path)
            .with_context(|| format!("opening store at {}", config.store_path.display()))?;
        let rpc = RpcClient::new(config.rpc_url.clone());
        let explorer = ExplorerClient::new(
            config.chain.blockscout_host(),
            config.keys.blockscout.clone(),
        );

        Ok(Self {
            config,
            store,
            rpc,
            explorer,
        })
    }

    /// One full pass: blocks, prices, events, then the points driver.
    async fn run_cycle(&self) -> anyhow::Result<()> {
        let addresses = self.config.chain.addresses();

        BlocksSync::new(&self.rpc, &self.explorer, &self.store, &addresses)
            .sync()
            .await?;

        PricesSync::new(
            &self.store,
            self.config.price_provider.into(),
            self.config.keys.coinmarketcap.clone(),
            self.config.keys.alchemy.clone(),
        )
        .sync()
        .await?;

        EventsSync::new(&self.rpc, &self.explorer, &self.store, &addresses)
            .sync()
            .await?;

        let store = self.store.clone();
        let processed = tokio::task::spawn_blocking(move || Driver::new(store).run())
            .await
            .context("points driver task")??;

        if processed > 0 {
            info!(processed, "points advanced");
        }

        Ok(())
    }

    async fn daemon(&self) -> anyhow::Result<()> {
        let api_store = Arc::new(self.store.clone());
        let listen = self.config.api.listen;

        tokio::spawn(async move {
            if let Err(err) = tally_api::serve(api_store, listen).await {
                error!(?err, "api server terminated");
            }
        });

        let pause = Duration::from_secs(self.config.daemon.pause_secs);

        loop {
            match self.run_cycle().await {
                Ok(()) => {}
                Err(err) if is_transient(&err) => {
                    warn!(?err, "cycle failed, will retry next round");
                }
                Err(err) => return Err(err.context("fatal indexing failure")),
            }

            tokio::time::sleep(pause).await;
        }
    }

    async fn seed(&self) -> anyhow::Result<()> {
        let collaterals = self.config.collateral_seeds();
        if !collaterals.is_empty() {
            seed_collaterals(&self.rpc, &self.store, &collaterals).await?;
        }

        let networks = self.config.network_seeds()?;
        if !networks.is_empty() {
            seed_networks(&self.store, &networks)?;
        }

        info!(
            collaterals = collaterals.len(),
            networks = networks.len(),
            "seeding complete"
        );

        Ok(())
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(ingest) = err.downcast_ref::<IngestError>() {
        return ingest.is_transient();
    }

    if let Some(points) = err.downcast_ref::<PointsError>() {
        return points.is_transient();
    }

    false
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let app = App::new(config)?;

    match cli.command {
        Command::Daemon => app.daemon().await,
        Command::Sync => app.run_cycle().await,
        Command::Serve => {
            let store = Arc::new(app.store.clone());
            tally_api::serve(store, app.config.api.listen)
                .await
                .context("api server")
        }
        Command::Seed => app.seed().await,
    }
}
