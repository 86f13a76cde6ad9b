//! Full enumeration of a registry's agents.
//!
//! Catches up on agents registered while the indexer was down or whose
//! events were missed: ids `1..=count` are read one by one and every usable
//! locator goes through the ingest path.

use agentdex_core::U256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::{ChainContext, Ingestor};
use crate::listener::registry::{AgentLocator, IdentityRegistry};

/// Counts from one backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Agent count reported by the registry
    pub total: u64,

    /// Cards fetched and stored
    pub stored: u64,

    /// Ids with no usable locator
    pub skipped: u64,

    /// Ids whose read, fetch or store failed
    pub failed: u64,
}

/// One-shot backfill for a chain.
pub struct Backfiller {
    chain: ChainContext,
    registry: IdentityRegistry,
    ingestor: Ingestor,
}

impl Backfiller {
    /// Create a backfiller.
    pub fn new(chain: ChainContext, registry: IdentityRegistry, ingestor: Ingestor) -> Self {
        Self {
            chain,
            registry,
            ingestor,
        }
    }

    /// Enumerate every agent the registry currently knows.
    ///
    /// Per-id errors are logged and counted; cancellation is checked
    /// between ids.
    pub async fn run(&self, cancel: &CancellationToken) -> BackfillReport {
        let chain = self.chain.name.as_str();
        let mut report = BackfillReport::default();

        let count = tokio::select! {
            _ = cancel.cancelled() => return report,
            count = self.registry.agent_count() => count,
        };

        let count = match count {
            Ok(count) if !count.is_zero() => count,
            Ok(_) => {
                info!(chain, "Registry reports no agents, nothing to backfill");
                return report;
            }
            Err(e) => {
                info!(chain, error = %format!("{:#}", e), "Agent count unavailable, skipping backfill");
                return report;
            }
        };

        report.total = count.saturating_to::<u64>();
        info!(chain, total = report.total, layout = %self.registry.layout(), "Backfill starting");

        for id in 1..=report.total {
            if cancel.is_cancelled() {
                info!(chain, at = id, "Backfill cancelled");
                break;
            }

            let agent_id = U256::from(id);
            let processed = tokio::select! {
                _ = cancel.cancelled() => break,
                processed = self.backfill_one(agent_id) => processed,
            };

            match processed {
                Processed::Stored => report.stored += 1,
                Processed::Skipped => report.skipped += 1,
                Processed::Failed => report.failed += 1,
            }
        }

        info!(
            chain,
            total = report.total,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            "Backfill complete"
        );

        report
    }

    async fn backfill_one(&self, agent_id: U256) -> Processed {
        let chain = self.chain.name.as_str();

        let locator = match self.registry.agent_locator(agent_id).await {
            Ok(locator) => locator,
            Err(e) => {
                warn!(chain, %agent_id, error = %format!("{:#}", e), "Failed to read agent");
                return Processed::Failed;
            }
        };

        if locator.is_empty() {
            debug!(chain, %agent_id, "Agent has no locator");
            return Processed::Skipped;
        }

        let locator = match locator {
            AgentLocator::Card(locator) => locator,
            AgentLocator::Registration(uri) => {
                match self.ingestor.decoder().resolve_registration(agent_id, &uri).await {
                    Some(locator) => locator,
                    None => return Processed::Skipped,
                }
            }
        };

        match self
            .ingestor
            .store_card(chain, Some(self.chain.registry), agent_id, locator.trim())
            .await
        {
            Ok(Some(_)) => Processed::Stored,
            Ok(None) => Processed::Failed,
            Err(e) => {
                warn!(chain, %agent_id, error = %format!("{:#}", e), "Failed to store agent");
                Processed::Failed
            }
        }
    }
}

enum Processed {
    Stored,
    Skipped,
    Failed,
}
