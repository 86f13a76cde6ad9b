//! Agent record storage operations.

use super::{PlaceholderAgent, RecordStore, Storage};
use agentdex_core::{Address, AgentRecord, RecordKey, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::str::FromStr;

impl Storage {
    /// Insert or update one agent record.
    ///
    /// `first_seen_at` is kept from the existing row; everything else is
    /// overwritten. `locator` is the storage key, `source_locator` the
    /// locator the card was fetched from.
    pub async fn upsert_agent(
        &self,
        chain: &str,
        registry_address: Option<Address>,
        agent_id: U256,
        locator: &str,
        source_locator: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let key = RecordKey::new(agent_id, locator);
        let metadata_json =
            serde_json::to_string(metadata).context("Failed to serialize agent metadata")?;
        let registry = registry_address.map(|a| format!("{:#x}", a));
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO agents (
                chain, record_key, agent_id, registry_address, locator,
                source_locator, metadata_json, first_seen_at, last_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain, record_key) DO UPDATE SET
                registry_address = excluded.registry_address,
                locator = excluded.locator,
                source_locator = excluded.source_locator,
                metadata_json = excluded.metadata_json,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(chain)
        .bind(key.storage_key())
        .bind(agent_id.to_string())
        .bind(registry)
        .bind(locator)
        .bind(source_locator)
        .bind(metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert agent {} on {}", key, chain))?;

        Ok(())
    }

    /// Placeholder records on a chain, oldest first.
    pub async fn list_placeholders(&self, chain: &str, limit: u32) -> Result<Vec<PlaceholderAgent>> {
        let rows = sqlx::query(
            r#"
            SELECT locator, COALESCE(source_locator, locator) AS source_locator
            FROM agents
            WHERE chain = ? AND agent_id = '0'
            ORDER BY first_seen_at ASC, locator ASC
            LIMIT ?
            "#,
        )
        .bind(chain)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list placeholder agents")?;

        rows.into_iter()
            .map(|row| {
                Ok(PlaceholderAgent {
                    key: row.try_get("locator")?,
                    source_locator: row.try_get("source_locator")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Invalid placeholder row")
    }

    /// Delete a record by key. Returns `true` if a row was removed.
    pub async fn remove_agent(&self, chain: &str, key: &RecordKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM agents
            WHERE chain = ? AND record_key = ?
            "#,
        )
        .bind(chain)
        .bind(key.storage_key())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to delete agent {} on {}", key, chain))?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single record.
    pub async fn get_agent(&self, chain: &str, key: &RecordKey) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT chain, agent_id, registry_address, locator,
                   COALESCE(source_locator, locator) AS source_locator,
                   metadata_json, first_seen_at, last_updated_at
            FROM agents
            WHERE chain = ? AND record_key = ?
            "#,
        )
        .bind(chain)
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch agent")?;

        row.map(Self::row_to_agent_record).transpose()
    }

    /// List records, optionally restricted to one chain, most recently
    /// updated first.
    pub async fn list_agents(&self, chain: Option<&str>, limit: u32) -> Result<Vec<AgentRecord>> {
        let rows = match chain {
            Some(chain) => {
                sqlx::query(
                    r#"
                    SELECT chain, agent_id, registry_address, locator,
                           COALESCE(source_locator, locator) AS source_locator,
                           metadata_json, first_seen_at, last_updated_at
                    FROM agents
                    WHERE chain = ?
                    ORDER BY last_updated_at DESC, record_key ASC
                    LIMIT ?
                    "#,
                )
                .bind(chain)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT chain, agent_id, registry_address, locator,
                           COALESCE(source_locator, locator) AS source_locator,
                           metadata_json, first_seen_at, last_updated_at
                    FROM agents
                    ORDER BY last_updated_at DESC, chain ASC, record_key ASC
                    LIMIT ?
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list agents")?;

        rows.into_iter().map(Self::row_to_agent_record).collect()
    }

    fn row_to_agent_record(row: sqlx::sqlite::SqliteRow) -> Result<AgentRecord> {
        let agent_id: String = row.try_get("agent_id")?;
        let registry: Option<String> = row.try_get("registry_address")?;
        let metadata_json: String = row.try_get("metadata_json")?;

        let registry_address = registry
            .map(|s| Address::from_str(&s))
            .transpose()
            .context("Invalid stored registry address")?;

        Ok(AgentRecord {
            chain: row.try_get("chain")?,
            registry_address,
            agent_id: U256::from_str_radix(&agent_id, 10).context("Invalid stored agent id")?,
            locator: row.try_get("locator")?,
            source_locator: row.try_get("source_locator")?,
            metadata: serde_json::from_str(&metadata_json)
                .context("Invalid stored agent metadata")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for Storage {
    async fn upsert_agent_from_card(
        &self,
        chain: &str,
        registry_address: Option<Address>,
        agent_id: U256,
        locator: &str,
        source_locator: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        self.upsert_agent(chain, registry_address, agent_id, locator, source_locator, metadata)
            .await
    }

    async fn list_placeholder_agents(
        &self,
        chain: &str,
        limit: u32,
    ) -> Result<Vec<PlaceholderAgent>> {
        self.list_placeholders(chain, limit).await
    }

    async fn delete_agent(&self, chain: &str, key: &RecordKey) -> Result<bool> {
        self.remove_agent(chain, key).await
    }
}
