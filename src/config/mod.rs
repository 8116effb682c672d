mod file_config;

pub use file_config::{FileConfig, JobsConfig};

use crate::background_jobs::JobCadence;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_EFFECTUATION_CRON: &str = "0 3 * * *";
pub const DEFAULT_LOCK_TIMEOUT_SEC: u64 = 10;
pub const DEFAULT_LOCK_TTL_SEC: u64 = 15 * 60;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub effectuation_cron: Option<String>,
    pub lock_timeout_sec: Option<u64>,
    pub lock_ttl_sec: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Job settings (with defaults)
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub cadence: JobCadence,
    pub lock_timeout: Duration,
    pub lock_ttl: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let jobs_file = file.jobs.unwrap_or_default();
        let cron = jobs_file
            .effectuation_cron
            .or_else(|| cli.effectuation_cron.clone())
            .unwrap_or_else(|| DEFAULT_EFFECTUATION_CRON.to_string());
        let cadence = JobCadence::parse(&cron)?;

        let lock_timeout = Duration::from_secs(
            jobs_file
                .lock_timeout_sec
                .or(cli.lock_timeout_sec)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_SEC),
        );
        let lock_ttl = Duration::from_secs(
            jobs_file
                .lock_ttl_sec
                .or(cli.lock_ttl_sec)
                .unwrap_or(DEFAULT_LOCK_TTL_SEC),
        );

        // A lock wait longer than the gap between ticks would let a stalled
        // acquisition bleed into the next tick.
        if lock_timeout >= cadence.min_spacing() {
            bail!(
                "lock_timeout_sec ({}s) must be shorter than the job interval ({}s)",
                lock_timeout.as_secs(),
                cadence.min_spacing().as_secs()
            );
        }
        if lock_ttl.is_zero() {
            bail!("lock_ttl_sec must be greater than zero");
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            jobs: JobsSettings {
                cadence,
                lock_timeout,
                lock_ttl,
            },
        })
    }

    pub fn coordination_db_path(&self) -> PathBuf {
        self.db_dir.join("coordination.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }

    pub fn transfers_db_path(&self) -> PathBuf {
        self.db_dir.join("transfers.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
