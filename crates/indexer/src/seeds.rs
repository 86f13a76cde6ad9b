//! Operator-supplied seed locators.
//!
//! Seeds are crawled independently of any chain and stored as placeholders
//! under the seed label until a registry confirms them.

use agentdex_core::U256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ingest::Ingestor;

/// Crawls the seed list.
pub struct SeedCrawler {
    ingestor: Ingestor,
    seeds: Vec<String>,
    chain_label: String,
}

impl SeedCrawler {
    /// Create a crawler storing placeholders under `chain_label`.
    pub fn new(ingestor: Ingestor, seeds: Vec<String>, chain_label: impl Into<String>) -> Self {
        Self {
            ingestor,
            seeds,
            chain_label: chain_label.into(),
        }
    }

    /// Seeds in crawl order.
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    /// Fetch every seed once. Returns how many were stored.
    pub async fn run(&self, cancel: &CancellationToken) -> usize {
        let mut stored = 0;

        for seed in &self.seeds {
            if cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.ingestor.store_card(&self.chain_label, None, U256::ZERO, seed) => result,
            };

            match result {
                Ok(Some(key)) => {
                    debug!(seed = %seed, key = %key, "Seed stored");
                    stored += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(seed = %seed, error = %format!("{:#}", e), "Failed to store seed");
                }
            }
        }

        stored
    }
}
