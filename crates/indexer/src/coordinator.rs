//! Process-level orchestration.
//!
//! The coordinator owns the configured chains. On [`Coordinator::run`] it
//! starts, per chain, a supervised watcher and a one-shot backfill, plus a
//! single ticker that crawls seeds and then reconciles placeholders on every
//! chain. Chains that could not be dialed at startup are re-dialed with
//! backoff and get the same tasks once they connect. One cancellation token
//! reaches every task.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backfill::{BackfillReport, Backfiller};
use crate::config::{ChainConfig, Config, IndexerConfig};
use crate::ingest::{ChainContext, Ingestor};
use crate::listener::provider::{AlloyConnector, ChainClient, ChainConnector};
use crate::listener::registry::{IdentityRegistry, RegistryLayout};
use crate::listener::supervisor::{BackoffPolicy, Supervisor};
use crate::listener::watcher::ChainWatcher;
use crate::metadata::MetadataFetcher;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::seeds::SeedCrawler;
use crate::storage::RecordStore;

/// Scheduling knobs shared by every chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Seed crawl + reconcile interval
    pub tick_interval: Duration,

    /// How long to wait for tasks after cancellation
    pub shutdown_grace: Duration,

    /// First watcher restart delay
    pub backoff_initial: Duration,

    /// Watcher restart delay cap
    pub backoff_max: Duration,

    /// Chain label for seed placeholders
    pub seed_chain: String,

    /// Seed locators
    pub seeds: Vec<String>,

    /// Placeholders examined per chain and pass
    pub reconcile_batch_size: u32,
}

impl CoordinatorSettings {
    /// Settings from the `[indexer]` section.
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
            backoff_initial: Duration::from_secs(config.subscription_retry_secs),
            backoff_max: Duration::from_secs(config.max_backoff_secs),
            seed_chain: config.seed_chain.clone(),
            seeds: config.seed_list(),
            reconcile_batch_size: config.reconcile_batch_size,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default())
    }
}

/// A configured chain, before it has been dialed.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    /// Name and registry address
    pub context: ChainContext,

    /// RPC endpoint to dial
    pub rpc_url: String,

    /// Registry layout
    pub layout: RegistryLayout,

    /// Polling fallback interval
    pub poll_interval: Duration,

    /// Block span per log query
    pub log_range_limit: u64,
}

impl ChainEndpoint {
    /// Endpoint for a configured chain.
    pub fn from_config(name: &str, chain: &ChainConfig, defaults: &IndexerConfig) -> Self {
        Self {
            context: ChainContext {
                name: name.to_string(),
                registry: chain.identity_registry,
            },
            rpc_url: chain.rpc_url.clone(),
            layout: chain.registry_layout,
            poll_interval: chain.poll_interval(defaults),
            log_range_limit: chain.log_range_limit(defaults),
        }
    }

    /// Attach a dialed client.
    pub fn into_runtime(self, client: Arc<dyn ChainClient>) -> ChainRuntime {
        ChainRuntime {
            context: self.context,
            client,
            layout: self.layout,
            poll_interval: self.poll_interval,
            log_range_limit: self.log_range_limit,
        }
    }
}

/// One connected chain.
#[derive(Clone)]
pub struct ChainRuntime {
    /// Name and registry address
    pub context: ChainContext,

    /// Chain access
    pub client: Arc<dyn ChainClient>,

    /// Registry layout
    pub layout: RegistryLayout,

    /// Polling fallback interval
    pub poll_interval: Duration,

    /// Block span per log query
    pub log_range_limit: u64,
}

impl ChainRuntime {
    /// Typed view of this chain's identity registry.
    pub fn registry(&self) -> IdentityRegistry {
        IdentityRegistry::new(self.client.clone(), self.context.registry, self.layout)
    }
}

/// Results of one seed crawl + reconcile cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Seeds stored as placeholders
    pub seeds_stored: usize,

    /// Reconcile results per chain
    pub reconciled: Vec<(String, ReconcileReport)>,
}

/// Owns the chains and every background task.
#[derive(Clone)]
pub struct Coordinator {
    chains: Vec<ChainRuntime>,
    pending: Vec<ChainEndpoint>,
    dialed: Arc<RwLock<Vec<ChainRuntime>>>,
    connector: Arc<dyn ChainConnector>,
    ingestor: Ingestor,
    settings: CoordinatorSettings,
}

impl Coordinator {
    /// Create a coordinator with no chains.
    pub fn new(ingestor: Ingestor, settings: CoordinatorSettings) -> Self {
        Self {
            chains: Vec::new(),
            pending: Vec::new(),
            dialed: Arc::new(RwLock::new(Vec::new())),
            connector: Arc::new(AlloyConnector),
            ingestor,
            settings,
        }
    }

    /// Use `connector` to dial pending chains.
    pub fn with_connector(mut self, connector: Arc<dyn ChainConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Build from configuration, dialing every configured chain over alloy.
    pub async fn connect(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        Self::connect_with(config, store, Arc::new(AlloyConnector)).await
    }

    /// Build from configuration, dialing every configured chain once.
    ///
    /// A chain that cannot be dialed is kept as pending. [`Coordinator::run`]
    /// keeps re-dialing it with backoff and starts its tasks once it connects.
    pub async fn connect_with(
        config: &Config,
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<Self> {
        let fetcher = MetadataFetcher::from_config(&config.metadata)?;
        let ingestor = Ingestor::new(fetcher, store);
        let mut coordinator = Self::new(ingestor, CoordinatorSettings::from_config(&config.indexer))
            .with_connector(connector);

        for (name, chain) in &config.chains {
            let endpoint = ChainEndpoint::from_config(name, chain, &config.indexer);

            match coordinator.connector.connect(&endpoint.rpc_url).await {
                Ok(client) => {
                    info!(
                        chain = %name,
                        registry = %chain.identity_registry,
                        layout = %chain.registry_layout,
                        "Chain connected"
                    );
                    coordinator.add_chain(endpoint.into_runtime(client));
                }
                Err(e) => {
                    warn!(chain = %name, error = %format!("{:#}", e), "Failed to dial chain, will retry");
                    coordinator.add_pending(endpoint);
                }
            }
        }

        Ok(coordinator)
    }

    /// Add a connected chain.
    pub fn add_chain(&mut self, chain: ChainRuntime) {
        self.chains.push(chain);
    }

    /// Add a chain to dial when [`Coordinator::run`] starts.
    pub fn add_pending(&mut self, endpoint: ChainEndpoint) {
        self.pending.push(endpoint);
    }

    /// Chains still waiting for their first successful dial at startup.
    pub fn pending(&self) -> &[ChainEndpoint] {
        &self.pending
    }

    /// Every connected chain, including those dialed after startup.
    pub async fn chains(&self) -> Vec<ChainRuntime> {
        let mut chains = self.chains.clone();
        chains.extend(self.dialed.read().await.iter().cloned());
        chains
    }

    /// Shared ingest path.
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Run every task until `cancel` fires, then wait for them within the
    /// shutdown grace period.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        if self.chains.is_empty() && self.pending.is_empty() {
            warn!("No chains configured, running seed crawl only");
        }

        let mut tasks = JoinSet::new();

        for chain in &self.chains {
            let (supervisor, backfiller) = self.chain_tasks(chain);

            let token = cancel.clone();
            tasks.spawn(async move {
                supervisor.run(token).await;
            });

            let token = cancel.clone();
            tasks.spawn(async move {
                backfiller.run(&token).await;
            });
        }

        for endpoint in self.pending.iter().cloned() {
            let dialer = self.clone();
            let token = cancel.clone();
            tasks.spawn(async move {
                dialer.dial_and_watch(endpoint, token).await;
            });
        }

        let ticker = self.clone();
        let token = cancel.clone();
        tasks.spawn(async move {
            ticker.tick_loop(token).await;
        });

        info!(
            chains = self.chains.len(),
            pending = self.pending.len(),
            tick_secs = self.settings.tick_interval.as_secs(),
            "Coordinator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Background task failed");
                    }
                }
            }
        }

        info!(remaining = tasks.len(), "Shutting down, waiting for tasks");

        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Background task failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_secs = self.settings.shutdown_grace.as_secs(),
                "Shutdown grace period elapsed, aborting remaining tasks"
            );
            tasks.abort_all();
        }

        info!("Coordinator stopped");

        Ok(())
    }

    fn chain_tasks(&self, chain: &ChainRuntime) -> (Supervisor, Backfiller) {
        let watcher = ChainWatcher::new(
            chain.context.clone(),
            chain.client.clone(),
            self.ingestor.clone(),
            chain.poll_interval,
            chain.log_range_limit,
        );
        let supervisor = Supervisor::new(watcher, self.backoff_policy());
        let backfiller = Backfiller::new(chain.context.clone(), chain.registry(), self.ingestor.clone());

        (supervisor, backfiller)
    }

    fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.settings.backoff_initial, self.settings.backoff_max)
    }

    /// Re-dial a pending chain until it connects, then watch and backfill it.
    async fn dial_and_watch(&self, endpoint: ChainEndpoint, cancel: CancellationToken) {
        let name = endpoint.context.name.clone();
        let mut policy = self.backoff_policy();

        let client = loop {
            let dialed = tokio::select! {
                _ = cancel.cancelled() => return,
                dialed = self.connector.connect(&endpoint.rpc_url) => dialed,
            };

            match dialed {
                Ok(client) => break client,
                Err(e) => {
                    let delay = policy.next_delay();
                    warn!(
                        chain = %name,
                        error = %format!("{:#}", e),
                        retry_ms = delay.as_millis() as u64,
                        "Failed to dial chain, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        info!(chain = %name, registry = %endpoint.context.registry, "Chain connected");

        let chain = endpoint.into_runtime(client);
        let (supervisor, backfiller) = self.chain_tasks(&chain);
        self.dialed.write().await.push(chain);

        tokio::join!(supervisor.run(cancel.clone()), backfiller.run(&cancel));
    }

    async fn tick_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.run_cycle(&cancel).await;
        }
    }

    /// Crawl seeds once, then reconcile placeholders on every chain.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        let crawler = SeedCrawler::new(
            self.ingestor.clone(),
            self.settings.seeds.clone(),
            self.settings.seed_chain.clone(),
        );
        report.seeds_stored = crawler.run(cancel).await;

        for chain in self.chains().await {
            if cancel.is_cancelled() {
                break;
            }

            let reconciler = Reconciler::new(
                chain.context.clone(),
                chain.registry(),
                self.ingestor.clone(),
                self.settings.seed_chain.clone(),
                self.settings.reconcile_batch_size,
            );
            let result = reconciler.run(cancel).await;
            report.reconciled.push((chain.context.name.clone(), result));
        }

        report
    }

    /// Run a backfill pass on one chain, or on all when `chain` is `None`.
    pub async fn backfill(
        &self,
        chain: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, BackfillReport)>> {
        let connected = self.chains().await;
        let selected: Vec<ChainRuntime> = match chain {
            Some(name) => {
                let found: Vec<_> = connected
                    .into_iter()
                    .filter(|c| c.context.name == name)
                    .collect();
                if found.is_empty() {
                    if self.pending.iter().any(|p| p.context.name == name) {
                        anyhow::bail!("Chain '{}' is configured but could not be dialed", name);
                    }
                    anyhow::bail!("Chain '{}' is not configured", name);
                }
                found
            }
            None => connected,
        };

        let mut reports = Vec::with_capacity(selected.len());
        for chain in selected {
            let backfiller = Backfiller::new(
                chain.context.clone(),
                chain.registry(),
                self.ingestor.clone(),
            );
            reports.push((chain.context.name.clone(), backfiller.run(cancel).await));
        }

        Ok(reports)
    }
}
