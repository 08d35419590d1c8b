//! vitald: the VitalGrid daemon.
//!
//! Single binary that assembles the health engine:
//! - Report store (redb)
//! - Health ledger, reloaded from the store
//! - Entity catalog (TOML)
//! - Expiry sweeper
//! - Query engine + client facade
//! - REST API
//!
//! # Usage
//!
//! ```text
//! vitald serve --port 8480 --data-dir /var/lib/vitalgrid --catalog catalog.toml
//! vitald default-config > vitalgrid.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vitalgrid_catalog::InMemoryCatalog;
use vitalgrid_client::HealthClient;
use vitalgrid_core::EngineConfig;
use vitalgrid_eval::QueryEngine;
use vitalgrid_ledger::{ExpirySweeper, HealthLedger};
use vitalgrid_store::RedbReportStore;

#[derive(Parser)]
#[command(name = "vitald", about = "VitalGrid health daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Data directory for the report store.
        #[arg(long, default_value = "/var/lib/vitalgrid")]
        data_dir: PathBuf,

        /// Engine configuration (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Entity catalog (TOML). Only the cluster is known when omitted.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Print the default engine configuration.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            catalog,
        } => serve(port, data_dir, config.as_deref(), catalog.as_deref()).await,
        Command::DefaultConfig => {
            print!("{}", EngineConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vitald=debug,vitalgrid=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn serve(
    port: u16,
    data_dir: PathBuf,
    config_path: Option<&Path>,
    catalog_path: Option<&Path>,
) -> anyhow::Result<()> {
    info!("VitalGrid daemon starting");

    let config = match config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("vitalgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = RedbReportStore::open(&db_path)?;
    info!(path = ?db_path, "report store opened");

    let ledger = Arc::new(HealthLedger::open(config.ledger.clone(), Arc::new(store))?);
    let stats = ledger.stats();
    info!(entities = stats.entities, entries = stats.entries, "health ledger loaded");

    let catalog = Arc::new(match catalog_path {
        Some(path) => InMemoryCatalog::from_file(path)?,
        None => {
            warn!("no catalog given, only the cluster is known");
            InMemoryCatalog::new()
        }
    });
    info!(entities = catalog.entity_count(), "entity catalog loaded");

    let engine = QueryEngine::new(Arc::clone(&ledger), catalog.clone(), config.query.clone());
    let client = HealthClient::new(engine);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweeper_handle = if config.sweeper.enabled {
        let sweeper = ExpirySweeper::new(Arc::clone(&ledger), config.sweeper.clone())
            .with_graph(catalog);
        Some(tokio::spawn(sweeper.run(shutdown_rx)))
    } else {
        info!("expiry sweeper disabled, expiry resolves on read only");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let router = vitalgrid_api::build_router(client);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C, serving until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }

    info!("VitalGrid daemon stopped");
    Ok(())
}
