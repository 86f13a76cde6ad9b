//! Placeholder upgrade.
//!
//! Placeholders are records stored with agent id 0: the card is known but no
//! on-chain id has been confirmed. Each pass asks the chain's registry to
//! resolve their keys and, on a hit, re-fetches the card from the source
//! locator it was first crawled from, stores it under the real id and removes
//! the placeholder.

use agentdex_core::RecordKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::{ChainContext, Ingestor};
use crate::listener::registry::IdentityRegistry;
use crate::storage::PlaceholderAgent;

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Placeholders looked up
    pub checked: u64,

    /// Placeholders replaced by a confirmed record
    pub upgraded: u64,
}

/// Upgrades placeholders for one chain.
pub struct Reconciler {
    chain: ChainContext,
    registry: IdentityRegistry,
    ingestor: Ingestor,
    seed_chain: String,
    batch_size: u32,
}

impl Reconciler {
    /// Create a reconciler.
    ///
    /// Placeholders stored under `seed_chain` are considered as well as the
    /// chain's own.
    pub fn new(
        chain: ChainContext,
        registry: IdentityRegistry,
        ingestor: Ingestor,
        seed_chain: impl Into<String>,
        batch_size: u32,
    ) -> Self {
        Self {
            chain,
            registry,
            ingestor,
            seed_chain: seed_chain.into(),
            batch_size,
        }
    }

    /// Run one pass. Failures leave placeholders untouched.
    pub async fn run(&self, cancel: &CancellationToken) -> ReconcileReport {
        let chain = self.chain.name.as_str();
        let mut report = ReconcileReport::default();

        if !self.registry.supports_reverse_lookup() {
            debug!(chain, layout = %self.registry.layout(), "Registry has no reverse lookup, skipping reconcile");
            return report;
        }

        let mut labels = vec![chain];
        if self.seed_chain != chain {
            labels.push(self.seed_chain.as_str());
        }

        for label in labels {
            let placeholders = match self
                .ingestor
                .store()
                .list_placeholder_agents(label, self.batch_size)
                .await
            {
                Ok(placeholders) => placeholders,
                Err(e) => {
                    warn!(chain, label, error = %format!("{:#}", e), "Failed to list placeholders");
                    continue;
                }
            };

            for placeholder in placeholders {
                if cancel.is_cancelled() {
                    return report;
                }

                report.checked += 1;
                let upgraded = tokio::select! {
                    _ = cancel.cancelled() => return report,
                    upgraded = self.upgrade(label, &placeholder) => upgraded,
                };
                if upgraded {
                    report.upgraded += 1;
                }
            }
        }

        if report.checked > 0 {
            info!(chain, checked = report.checked, upgraded = report.upgraded, "Reconcile pass complete");
        }

        report
    }

    async fn upgrade(&self, label: &str, placeholder: &PlaceholderAgent) -> bool {
        let chain = self.chain.name.as_str();
        let key = placeholder.key.as_str();
        let source = placeholder.source_locator.as_str();

        let agent_id = match self.registry.resolve_by_domain(key).await {
            Ok(Some(agent_id)) => agent_id,
            Ok(None) => {
                debug!(chain, key, "Placeholder not registered yet");
                return false;
            }
            Err(e) => {
                debug!(chain, key, error = %format!("{:#}", e), "Reverse lookup failed");
                return false;
            }
        };

        match self
            .ingestor
            .store_card(chain, Some(self.chain.registry), agent_id, source)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(e) => {
                warn!(chain, %agent_id, source, error = %format!("{:#}", e), "Failed to store confirmed agent");
                return false;
            }
        }

        let record_key = RecordKey::Placeholder(key.to_string());
        match self.ingestor.store().delete_agent(label, &record_key).await {
            Ok(_) => {
                info!(chain, %agent_id, key, source, "Placeholder upgraded");
                true
            }
            Err(e) => {
                warn!(chain, %agent_id, key, error = %format!("{:#}", e), "Failed to delete placeholder");
                false
            }
        }
    }
}
