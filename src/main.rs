use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod background_jobs;
use background_jobs::create_scheduler;

mod config;
use config::{AppConfig, CliConfig, FileConfig};

mod coordination;
use coordination::{LockCoordinator, SqliteLockStore};

mod server;
use server::{run_server, RequestsLoggingLevel};

mod server_store;
use server_store::SqliteServerStore;

mod sqlite_persistence;

mod transfer;
use transfer::SqliteTransferStore;

use tokio_util::sync::CancellationToken;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite database files.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Cron expression for the transfer effectuation job.
    #[clap(long)]
    pub effectuation_cron: Option<String>,

    /// Seconds to wait for the cluster lock before skipping a run.
    #[clap(long)]
    pub lock_timeout_sec: Option<u64>,

    /// Seconds before an unreleased lock claim expires.
    #[clap(long)]
    pub lock_ttl_sec: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        port: cli_args.port,
        logging_level: cli_args.logging_level,
        effectuation_cron: cli_args.effectuation_cron,
        lock_timeout_sec: cli_args.lock_timeout_sec,
        lock_ttl_sec: cli_args.lock_ttl_sec,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!("Opening databases under {:?}...", config.db_dir);
    let lock_store = Arc::new(SqliteLockStore::new(config.coordination_db_path())?);
    let server_store = Arc::new(SqliteServerStore::new(config.server_db_path())?);
    let transfer_store = Arc::new(SqliteTransferStore::new(config.transfers_db_path())?);

    let coordinator = LockCoordinator::with_ttl(lock_store, config.jobs.lock_ttl);
    info!(
        "This instance coordinates as holder {} (cadence '{}')",
        coordinator.holder_id(),
        config.jobs.cadence
    );

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(
        coordinator,
        transfer_store.clone(),
        server_store,
        config.jobs.cadence,
        config.jobs.lock_timeout,
        shutdown_token.clone(),
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    // Ctrl-C stops the scheduler cleanly; any run already holding the lock
    // finishes and releases before the task exits.
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    info!("Ready to serve at port {}!", config.port);
    let server_result = tokio::select! {
        result = run_server(
            scheduler_handle,
            transfer_store,
            config.logging_level.clone(),
            config.port,
            env!("GIT_HASH").to_string(),
        ) => result,
        _ = shutdown_token.cancelled() => Ok(()),
    };

    if let Err(e) = &server_result {
        error!("Server terminated with error: {:#}", e);
    }
    shutdown_token.cancel();
    let _ = scheduler_task.await;

    server_result
}
