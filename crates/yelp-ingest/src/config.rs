//! Configuration management

use crate::coordinator::CoordinatorSettings;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use std::time::Duration;
use yelp_common::{LoaderError, Result};

// ============================================================================
// Loader Configuration Constants
// ============================================================================

/// Default database name when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_NAME: &str = "milestone3db";

pub const DEFAULT_DATABASE_HOST: &str = "localhost";

pub const DEFAULT_DATABASE_PORT: u16 = 5432;

pub const DEFAULT_DATABASE_USER: &str = "postgres";

/// Default connect/acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Rows per INSERT statement inside one batch transaction.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Barrier-synchronized phases need at least two workers.
pub const MIN_WORKERS: usize = 2;

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: compose_url(
                DEFAULT_DATABASE_HOST,
                DEFAULT_DATABASE_PORT,
                DEFAULT_DATABASE_NAME,
                DEFAULT_DATABASE_USER,
                "",
            ),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Read `DATABASE_URL`, or assemble a URL from `POSTGRES_HOST`,
    /// `POSTGRES_PORT`, `POSTGRES_DB`, `POSTGRES_USER` and `POSTGRES_PASSWORD`.
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            compose_url(
                &env_or("POSTGRES_HOST", DEFAULT_DATABASE_HOST.to_string()),
                env_or("POSTGRES_PORT", DEFAULT_DATABASE_PORT),
                &env_or("POSTGRES_DB", DEFAULT_DATABASE_NAME.to_string()),
                &env_or("POSTGRES_USER", DEFAULT_DATABASE_USER.to_string()),
                &env_or("POSTGRES_PASSWORD", String::new()),
            )
        });

        Self {
            url,
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

fn compose_url(host: &str, port: u16, database: &str, user: &str, password: &str) -> String {
    if password.is_empty() {
        format!("postgresql://{user}@{host}:{port}/{database}")
    } else {
        format!("postgresql://{user}:{password}@{host}:{port}/{database}")
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Loader configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    /// Requested worker count; see [`IngestConfig::worker_count`].
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub page_size: usize,
    /// Upper bound on a single barrier wait. `None` waits indefinitely.
    pub barrier_timeout_secs: Option<u64>,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workers: default_workers(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 0,
            page_size: DEFAULT_PAGE_SIZE,
            barrier_timeout_secs: None,
            show_progress: true,
        }
    }
}

impl IngestConfig {
    /// Load `.env`, then read the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables:
    /// - `INGEST_WORKERS`, `INGEST_MAX_ATTEMPTS`, `INGEST_RETRY_DELAY_MS`
    /// - `INGEST_PAGE_SIZE`, `INGEST_BARRIER_TIMEOUT_SECS`, `INGEST_SHOW_PROGRESS`
    /// - database variables read by [`DatabaseConfig::from_env`]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database: DatabaseConfig::from_env(),
            workers: env_or("INGEST_WORKERS", defaults.workers),
            max_attempts: env_or("INGEST_MAX_ATTEMPTS", defaults.max_attempts),
            retry_delay_ms: env_or("INGEST_RETRY_DELAY_MS", defaults.retry_delay_ms),
            page_size: env_or("INGEST_PAGE_SIZE", defaults.page_size),
            barrier_timeout_secs: std::env::var("INGEST_BARRIER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            show_progress: env_or("INGEST_SHOW_PROGRESS", defaults.show_progress),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(LoaderError::Config("Database URL cannot be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(LoaderError::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(LoaderError::Config("page_size must be greater than 0".into()));
        }
        if self.barrier_timeout_secs == Some(0) {
            return Err(LoaderError::Config(
                "barrier timeout must be greater than 0 seconds".into(),
            ));
        }
        Ok(())
    }

    /// The worker count every component agrees on: partitions, barrier
    /// parties and pool size.
    pub fn worker_count(&self) -> usize {
        resolve_workers(self.workers)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts).with_delay(Duration::from_millis(self.retry_delay_ms))
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            workers: self.worker_count(),
            retry: self.retry_policy(),
            barrier_timeout: self.barrier_timeout_secs.map(Duration::from_secs),
            show_progress: self.show_progress,
        }
    }
}

pub fn resolve_workers(requested: usize) -> usize {
    requested.max(MIN_WORKERS)
}

/// Two fewer than the available cores, and never below [`MIN_WORKERS`].
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_WORKERS);
    resolve_workers(cores.saturating_sub(2))
}
