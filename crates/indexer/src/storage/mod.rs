//! Storage layer for the agentdex indexer.
//!
//! The ingestion pipeline only talks to the [`RecordStore`] contract:
//! - upsert an agent record from a fetched agent card
//! - list placeholder records awaiting an on-chain id
//! - delete a record (the placeholder-replacement case)
//!
//! [`Storage`] is the SQLite implementation used by the binary.

use agentdex_core::{Address, RecordKey, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod agents;

/// A placeholder record awaiting an on-chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderAgent {
    /// Locator key the placeholder is stored under
    pub key: String,

    /// Locator the card was fetched from (may carry a scheme and path)
    pub source_locator: String,
}

/// Durable agent record store consumed by the ingestion pipeline.
///
/// Implementations must be safe for concurrent calls and idempotent for
/// repeated identical upserts. Concurrent upserts of the same key are
/// last-writer-wins.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update the record keyed by `(chain, agent_id)`, or by
    /// `(chain, locator)` when `agent_id` is the placeholder sentinel 0.
    ///
    /// `locator` is the normalized key; `source_locator` is what the card
    /// was fetched from and what a later re-fetch must use.
    async fn upsert_agent_from_card(
        &self,
        chain: &str,
        registry_address: Option<Address>,
        agent_id: U256,
        locator: &str,
        source_locator: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// Placeholder records on `chain`, oldest first.
    async fn list_placeholder_agents(&self, chain: &str, limit: u32)
        -> Result<Vec<PlaceholderAgent>>;

    /// Delete one record. Returns `true` if a row was removed.
    async fn delete_agent(&self, chain: &str, key: &RecordKey) -> Result<bool>;
}

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// Creates the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] before use.
    ///
    /// # Example
    /// ```no_run
    /// # use agentdex_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://agentdex.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let agent_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE agent_id <> '0'")
            .fetch_one(&self.pool)
            .await?;

        let placeholder_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE agent_id = '0'")
                .fetch_one(&self.pool)
                .await?;

        let chain_count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT chain) FROM agents")
            .fetch_one(&self.pool)
            .await?;

        let last_updated_at: Option<i64> =
            sqlx::query_scalar("SELECT MAX(last_updated_at) FROM agents")
                .fetch_one(&self.pool)
                .await?;

        Ok(DatabaseStats {
            agent_count: agent_count as u64,
            placeholder_count: placeholder_count as u64,
            chain_count: chain_count as u64,
            last_updated_at,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Records with a confirmed on-chain id
    pub agent_count: u64,

    /// Placeholder records awaiting an on-chain id
    pub placeholder_count: u64,

    /// Distinct chain labels
    pub chain_count: u64,

    /// Latest store timestamp (unix seconds), if any record exists
    pub last_updated_at: Option<i64>,
}
