use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

use crate::events::context::{DEFAULT_BATCH_LIMIT, DEFAULT_TRASH_RETENTION_DAYS};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub batch_limit: usize,
    pub trash_retention_days: u32,
    pub lifecycle_interval_secs: u64,
    pub public_url: String,
    pub signing_secret: String,
    pub log_level: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Bucket store trash lifecycle worker")]
pub struct Args {
    /// Host the health server binds to (overrides BUCKET_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port the health server binds to (overrides BUCKET_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides BUCKET_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BUCKET_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Rows a cascade touches per phase and delivery (overrides BUCKET_STORE_BATCH_LIMIT)
    #[arg(long)]
    pub batch_limit: Option<usize>,

    /// Days an item stays in the trash (overrides BUCKET_STORE_TRASH_RETENTION_DAYS)
    #[arg(long)]
    pub trash_retention_days: Option<u32>,

    /// Seconds between trash expiry sweeps (overrides BUCKET_STORE_LIFECYCLE_INTERVAL_SECS)
    #[arg(long)]
    pub lifecycle_interval_secs: Option<u64>,

    /// Base URL for presigned links (overrides BUCKET_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Default log filter when RUST_LOG is unset (overrides BUCKET_STORE_LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("BUCKET_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("BUCKET_STORE_PORT", 3000u16)?;
        let env_storage =
            env::var("BUCKET_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BUCKET_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/bucket_store.db".into());
        let env_batch = env_or("BUCKET_STORE_BATCH_LIMIT", DEFAULT_BATCH_LIMIT)?;
        let env_retention = env_or("BUCKET_STORE_TRASH_RETENTION_DAYS", DEFAULT_TRASH_RETENTION_DAYS)?;
        let env_interval = env_or("BUCKET_STORE_LIFECYCLE_INTERVAL_SECS", 300u64)?;
        let env_public_url =
            env::var("BUCKET_STORE_PUBLIC_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());
        let env_log = env::var("BUCKET_STORE_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        // Environment only.
        let signing_secret = env::var("BUCKET_STORE_SIGNING_SECRET").unwrap_or_default();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            batch_limit: args.batch_limit.unwrap_or(env_batch),
            trash_retention_days: args.trash_retention_days.unwrap_or(env_retention),
            lifecycle_interval_secs: args.lifecycle_interval_secs.unwrap_or(env_interval),
            public_url: args.public_url.unwrap_or(env_public_url),
            signing_secret,
            log_level: args.log_level.unwrap_or(env_log),
        };
        cfg.validate()?;

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_limit == 0 {
            anyhow::bail!("batch limit must be at least 1");
        }
        if self.lifecycle_interval_secs == 0 {
            anyhow::bail!("lifecycle interval must be at least 1 second");
        }
        Ok(())
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_defaults_when_unset() {
        let value: u32 = env_or("BUCKET_STORE_TEST_SURELY_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let cfg = AppConfig {
            host: "127.0.0.1".into(),
            port: 3000,
            storage_dir: "./data".into(),
            database_url: "sqlite::memory:".into(),
            batch_limit: 0,
            trash_retention_days: 30,
            lifecycle_interval_secs: 60,
            public_url: "http://localhost".into(),
            signing_secret: String::new(),
            log_level: "info".into(),
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.addr(), "127.0.0.1:3000");
    }
}
