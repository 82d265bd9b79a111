//! slpindex CLI: operator tooling for the SLP token index.
//!
//! # Commands
//! ```text
//! slpindex info
//! slpindex checkpoint   [--db <path>]
//! slpindex reset        [--db <path>] --yes
//! slpindex probe        [--db <path>] [--rpc-url <url>]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use slpindex_core::CheckpointManager;
use slpindex_rpc::NodeRpcClient;
use slpindex_storage::SqliteStore;

mod cmd_probe;
mod logging;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(
    name = "slpindex",
    about = "SLP token index: checkpoint inspection and node probing",
    long_about = "
slpindex CLI: inspect the sync checkpoint stored by the indexer, reset it,
or compare it against a running node.

ENVIRONMENT VARIABLES:
  SLPINDEX_DB            SQLite database path
  SLPINDEX_RPC_URL       Node JSON-RPC URL
  SLPINDEX_RPC_USER      Node rpcuser
  SLPINDEX_RPC_PASSWORD  Node rpcpassword
  RUST_LOG               Log filter (overrides --log-level)
",
    version
)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, global = true, env = "SLPINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true, env = "SLPINDEX_DB")]
    db: Option<String>,

    #[arg(long, global = true, env = "SLPINDEX_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, global = true, env = "SLPINDEX_RPC_USER")]
    rpc_user: Option<String>,

    #[arg(long, global = true, env = "SLPINDEX_RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and effective settings
    Info,

    /// Print the stored sync checkpoint
    Checkpoint {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the stored checkpoint so the next sync starts at the floor
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Compare the stored checkpoint with the node's active chain
    Probe,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(db) = &self.db {
            settings.database = db.clone();
        }
        if let Some(url) = &self.rpc_url {
            settings.node.url = url.clone();
        }
        if let Some(user) = &self.rpc_user {
            settings.node.user = Some(user.clone());
        }
        if let Some(password) = &self.rpc_password {
            settings.node.password = Some(password.clone());
        }
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
        }
        if self.log_json {
            settings.log.json = true;
        }
        Ok(settings)
    }
}

async fn open_checkpoints(settings: &Settings) -> Result<(Arc<SqliteStore>, CheckpointManager)> {
    let store = Arc::new(
        SqliteStore::open(&settings.database)
            .await
            .with_context(|| format!("opening {}", settings.database))?,
    );
    let manager = CheckpointManager::new(
        store.clone(),
        settings.sync.floor(),
        settings.sync.checkpoint_history,
    );
    Ok((store, manager))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    logging::init_tracing(&settings.log);

    match cli.command {
        Commands::Info => {
            println!("slpindex {}", env!("CARGO_PKG_VERSION"));
            println!("  database      {}", settings.database);
            println!("  node          {}", settings.node.url);
            println!("  network       {}", settings.sync.network);
            println!("  floor         {}", settings.sync.floor());
            println!("  max rollback  {}", settings.sync.max_rollback);
            println!("  token filters {}", settings.sync.token_filters.len());
        }

        Commands::Checkpoint { json } => {
            let (store, checkpoints) = open_checkpoints(&settings).await?;
            let checkpoint = checkpoints.load().await?;
            let (confirmed, unconfirmed) = store.counts().await?;
            if json {
                let out = serde_json::json!({
                    "checkpoint": checkpoint,
                    "floor": checkpoints.floor(),
                    "confirmed": confirmed,
                    "unconfirmed": unconfirmed,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                match checkpoint {
                    Some(cp) => {
                        let hash = cp.hash.map(|h| h.to_string()).unwrap_or_else(|| "-".into());
                        println!("height {}  hash {}", cp.height, hash);
                    }
                    None => println!("no checkpoint stored (floor {})", checkpoints.floor()),
                }
                println!("{confirmed} confirmed, {unconfirmed} unconfirmed transactions");
            }
        }

        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            let (_, checkpoints) = open_checkpoints(&settings).await?;
            checkpoints.reset().await?;
            tracing::info!(database = %settings.database, "checkpoint reset");
            println!("checkpoint deleted; next sync starts at {}", checkpoints.floor());
        }

        Commands::Probe => {
            let (_, checkpoints) = open_checkpoints(&settings).await?;
            let node = NodeRpcClient::new(settings.node.clone())?;
            let outcome = cmd_probe::probe(&checkpoints, &node).await?;
            println!("{outcome}");
        }
    }

    Ok(())
}
