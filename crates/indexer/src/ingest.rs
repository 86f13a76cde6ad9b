//! Shared fetch-and-upsert path.
//!
//! Watchers, backfills, seed crawls and reconciliation all end in the same
//! place: fetch the agent card for a locator, derive its storage key, upsert.

use agentdex_core::U256;
use alloy::primitives::Address;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::listener::events::EventDecoder;
use crate::listener::provider::RawLog;
use crate::metadata::MetadataFetcher;
use crate::storage::RecordStore;

/// Chain a log or registry read came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    /// Configured chain name
    pub name: String,

    /// Identity registry address
    pub registry: Address,
}

/// What happened to one registry log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// Card fetched and stored under `key`.
    Stored {
        /// Agent id announced by the log
        agent_id: U256,
        /// Locator key the card was stored under
        key: String,
    },

    /// No discovery in the log (unknown, inert or undecodable event).
    Ignored,

    /// Discovery made but its card could not be fetched.
    Unfetchable {
        /// Agent id announced by the log
        agent_id: U256,
    },
}

/// Fetches agent cards and writes them to the record store.
#[derive(Clone)]
pub struct Ingestor {
    fetcher: MetadataFetcher,
    decoder: EventDecoder,
    store: Arc<dyn RecordStore>,
}

impl Ingestor {
    /// Create an ingestor.
    pub fn new(fetcher: MetadataFetcher, store: Arc<dyn RecordStore>) -> Self {
        Self {
            decoder: EventDecoder::new(fetcher.clone()),
            fetcher,
            store,
        }
    }

    /// Event decoder sharing this ingestor's fetcher.
    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    /// Metadata fetcher.
    pub fn fetcher(&self) -> &MetadataFetcher {
        &self.fetcher
    }

    /// Record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Decode one registry log and store the agent it announces.
    ///
    /// Errors only when the store itself fails.
    pub async fn handle_log(&self, chain: &ChainContext, log: &RawLog) -> Result<LogOutcome> {
        let Some(event) = self.decoder.discover(&chain.name, log).await else {
            return Ok(LogOutcome::Ignored);
        };

        debug!(
            chain = %chain.name,
            agent_id = %event.agent_id,
            locator = %event.locator,
            schema = event.schema.as_str(),
            block = ?event.block_number,
            "Discovered agent"
        );

        let stored = self
            .store_card(&chain.name, Some(chain.registry), event.agent_id, &event.locator)
            .await?;

        Ok(match stored {
            Some(key) => LogOutcome::Stored {
                agent_id: event.agent_id,
                key,
            },
            None => LogOutcome::Unfetchable {
                agent_id: event.agent_id,
            },
        })
    }

    /// Fetch the card behind `locator` and upsert it.
    ///
    /// Returns the stored locator key, or `None` when the card could not be
    /// fetched (logged at warn). `locator` itself is persisted as the
    /// record's source so the card can be fetched again later.
    pub async fn store_card(
        &self,
        chain: &str,
        registry: Option<Address>,
        agent_id: U256,
        locator: &str,
    ) -> Result<Option<String>> {
        let card = match self.fetcher.fetch_card(locator).await {
            Ok(card) => card,
            Err(e) => {
                warn!(chain, %agent_id, locator, error = %e, "Failed to fetch agent card");
                return Ok(None);
            }
        };

        self.store
            .upsert_agent_from_card(
                chain,
                registry,
                agent_id,
                &card.key,
                locator.trim(),
                &card.document,
            )
            .await?;

        info!(chain, %agent_id, key = %card.key, "Stored agent card");

        Ok(Some(card.key))
    }
}
