//! SQLite persistence.
//!
//! Repository functions take `&mut SqliteConnection` so a cascade phase can
//! run all of its reads and writes on one transaction.

pub mod buckets;
pub mod files;
pub mod folders;

use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use tracing::{debug, info};

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// Which children of a folder a query targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildFilter {
    /// Not in the trash.
    Active,
    /// In the trash and not already claimed by a restore or a purge.
    TrashedNotRestoring,
    /// In the trash, whatever the status.
    Trashed,
    /// Folders whose own restore cascade is still running.
    Restoring,
    /// Not yet handed to a purge cascade of their own.
    Unclaimed,
    /// Every row, soft-deleted or not.
    Any,
}

impl ChildFilter {
    fn folder_clause(&self) -> &'static str {
        match self {
            ChildFilter::Active => " AND deleted_at IS NULL",
            ChildFilter::TrashedNotRestoring => {
                " AND deleted_at IS NOT NULL AND IFNULL(status, '') NOT IN ('restoring', 'purging')"
            }
            ChildFilter::Trashed => " AND deleted_at IS NOT NULL",
            ChildFilter::Restoring => " AND status = 'restoring'",
            ChildFilter::Unclaimed => " AND IFNULL(status, '') != 'purging'",
            ChildFilter::Any => "",
        }
    }

    fn file_clause(&self) -> &'static str {
        match self {
            ChildFilter::Active => " AND deleted_at IS NULL",
            ChildFilter::TrashedNotRestoring => {
                " AND deleted_at IS NOT NULL AND status != 'restoring'"
            }
            ChildFilter::Trashed => " AND deleted_at IS NOT NULL",
            ChildFilter::Restoring => " AND status = 'restoring'",
            ChildFilter::Unclaimed | ChildFilter::Any => "",
        }
    }
}

/// Shared handle on the metadata database.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database at `url`, creating the file if needed.
    pub async fn connect(url: &str, max_connections: u32) -> sqlx::Result<Self> {
        info!("Opening database at {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Open a migrated in-memory database for testing.
    ///
    /// Pinned to a single connection that never idles out: every SQLite
    /// in-memory connection is its own database.
    pub async fn open_in_memory() -> sqlx::Result<Self> {
        debug!("Opening in-memory database");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> sqlx::Result<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> sqlx::Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> sqlx::Result<bool> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(one == 1)
    }
}
