#![allow(dead_code)]

use agentdex_core::{RecordKey, U256};
use agentdex_indexer::ingest::{ChainContext, Ingestor};
use agentdex_indexer::listener::provider::{ChainClient, ChainConnector, LogStream, RawLog};
use agentdex_indexer::listener::registry::{AgentInfo, IIdentityRegistry};
use agentdex_indexer::metadata::MetadataFetcher;
use agentdex_indexer::storage::{PlaceholderAgent, RecordStore};
use alloy::primitives::{address, Address, Bytes, LogData};
use alloy::sol_types::SolCall;
use anyhow::Result;
use async_trait::async_trait;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REGISTRY: Address = address!("8004000000000000000000000000000000008004");
pub const AGENT: Address = address!("00000000000000000000000000000000000000aa");

pub fn chain(name: &str) -> ChainContext {
    ChainContext {
        name: name.to_string(),
        registry: REGISTRY,
    }
}

pub fn raw(data: LogData, block: u64) -> RawLog {
    let mut log = RawLog::new(REGISTRY, data.topics().to_vec(), data.data.clone()).at_block(block);
    log.log_index = Some(0);
    log
}

/// What the next `subscribe_logs` call does.
pub enum Subscription {
    /// Fail with a "not supported" style error.
    Unsupported,
    /// Fail with any other error.
    Fail(String),
    /// Deliver these logs, then close.
    Deliver(Vec<RawLog>),
    /// Stay open and silent.
    Silent,
}

/// Scripted chain: heads, logs, subscriptions, registry reads and failures.
#[derive(Default)]
pub struct FakeChain {
    heads: Mutex<VecDeque<u64>>,
    head_failures: AtomicUsize,
    failing_ranges: Mutex<Vec<(u64, u64)>>,
    last_head: Mutex<u64>,
    logs: Mutex<Vec<RawLog>>,
    ranges: Mutex<Vec<(u64, u64)>>,
    subscriptions: Mutex<VecDeque<Subscription>>,
    subscribe_calls: AtomicUsize,
    agents: Mutex<BTreeMap<u64, String>>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_heads(&self, heads: &[u64]) {
        self.heads.lock().unwrap().extend(heads.iter().copied());
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn push_subscription(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push_back(subscription);
    }

    /// Fail the next `count` head reads. Queued heads are not consumed.
    pub fn fail_heads(&self, count: usize) {
        self.head_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `filter_logs` call for exactly `from..=to`. The attempt
    /// still shows up in [`FakeChain::ranges`].
    pub fn fail_range_once(&self, from: u64, to: u64) {
        self.failing_ranges.lock().unwrap().push((from, to));
    }

    /// Register agent `id` with its domain (agent-info layout) or URI
    /// (token-uri layout).
    pub fn set_agent(&self, id: u64, locator: &str) {
        self.agents.lock().unwrap().insert(id, locator.to_string());
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn agent(&self, id: U256) -> String {
        let id: u64 = id.saturating_to();
        self.agents.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    fn agent_count(&self) -> U256 {
        U256::from(self.agents.lock().unwrap().len())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn subscribe_logs(&self, _address: Address) -> Result<LogStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let next = self.subscriptions.lock().unwrap().pop_front();
        match next.unwrap_or(Subscription::Unsupported) {
            Subscription::Unsupported => anyhow::bail!("notifications not supported"),
            Subscription::Fail(message) => anyhow::bail!(message),
            Subscription::Deliver(logs) => Ok(stream::iter(logs.into_iter().map(Ok)).boxed()),
            Subscription::Silent => Ok(stream::pending().boxed()),
        }
    }

    async fn filter_logs(&self, _address: Address, from: u64, to: u64) -> Result<Vec<RawLog>> {
        self.ranges.lock().unwrap().push((from, to));

        {
            let mut failing = self.failing_ranges.lock().unwrap();
            if let Some(pos) = failing.iter().position(|r| *r == (from, to)) {
                failing.remove(pos);
                anyhow::bail!("query timeout for blocks {}..={}", from, to);
            }
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| block >= from && block <= to)
            })
            .cloned()
            .collect())
    }

    async fn current_block_number(&self) -> Result<u64> {
        if self
            .head_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("connection reset by peer");
        }

        let mut last = self.last_head.lock().unwrap();
        if let Some(head) = self.heads.lock().unwrap().pop_front() {
            *last = head;
        }
        Ok(*last)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        anyhow::ensure!(to == REGISTRY, "unexpected call target {}", to);
        let selector: [u8; 4] = calldata[..4].try_into()?;

        let out = if selector == IIdentityRegistry::getAgentCountCall::SELECTOR
            || selector == IIdentityRegistry::totalSupplyCall::SELECTOR
        {
            IIdentityRegistry::getAgentCountCall::abi_encode_returns(&(self.agent_count(),))
        } else if selector == IIdentityRegistry::getAgentCall::SELECTOR {
            let call = IIdentityRegistry::getAgentCall::abi_decode(&calldata, true)?;
            IIdentityRegistry::getAgentCall::abi_encode_returns(&(AgentInfo {
                agentId: call.agentId,
                agentDomain: self.agent(call.agentId),
                agentAddress: AGENT,
            },))
        } else if selector == IIdentityRegistry::tokenURICall::SELECTOR {
            let call = IIdentityRegistry::tokenURICall::abi_decode(&calldata, true)?;
            IIdentityRegistry::tokenURICall::abi_encode_returns(&(self.agent(call.tokenId),))
        } else if selector == IIdentityRegistry::resolveByDomainCall::SELECTOR {
            let call = IIdentityRegistry::resolveByDomainCall::abi_decode(&calldata, true)?;
            let id = self
                .agents
                .lock()
                .unwrap()
                .iter()
                .find(|(_, domain)| **domain == call.agentDomain)
                .map(|(id, _)| *id)
                .unwrap_or(0);
            IIdentityRegistry::resolveByDomainCall::abi_encode_returns(&(AgentInfo {
                agentId: U256::from(id),
                agentDomain: call.agentDomain,
                agentAddress: Address::ZERO,
            },))
        } else {
            anyhow::bail!("execution reverted")
        };

        Ok(Bytes::from(out))
    }
}

/// Connector whose first `failures` dials fail; later dials hand out `client`.
pub struct FlakyConnector {
    failures: usize,
    attempts: AtomicUsize,
    client: Arc<FakeChain>,
}

impl FlakyConnector {
    pub fn new(failures: usize, client: Arc<FakeChain>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: AtomicUsize::new(0),
            client,
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainConnector for FlakyConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("Failed to connect to RPC endpoint {}: connection refused", endpoint);
        }
        Ok(self.client.clone())
    }
}

/// One upsert seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub chain: String,
    pub registry: Option<Address>,
    pub agent_id: U256,
    pub locator: String,
    pub source_locator: String,
    pub metadata: Value,
}

/// In-memory store that records every mutation.
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<BTreeMap<(String, String), Upsert>>,
    upserts: Mutex<Vec<Upsert>>,
    deletes: Mutex<Vec<(String, RecordKey)>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upserts(&self) -> Vec<Upsert> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, RecordKey)> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn get(&self, chain: &str, key: &RecordKey) -> Option<Upsert> {
        self.records
            .lock()
            .unwrap()
            .get(&(chain.to_string(), key.storage_key()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn upsert_agent_from_card(
        &self,
        chain: &str,
        registry_address: Option<Address>,
        agent_id: U256,
        locator: &str,
        source_locator: &str,
        metadata: &Value,
    ) -> Result<()> {
        let upsert = Upsert {
            chain: chain.to_string(),
            registry: registry_address,
            agent_id,
            locator: locator.to_string(),
            source_locator: source_locator.to_string(),
            metadata: metadata.clone(),
        };
        let key = RecordKey::new(agent_id, locator).storage_key();

        self.upserts.lock().unwrap().push(upsert.clone());
        self.records
            .lock()
            .unwrap()
            .insert((chain.to_string(), key), upsert);
        Ok(())
    }

    async fn list_placeholder_agents(
        &self,
        chain: &str,
        limit: u32,
    ) -> Result<Vec<PlaceholderAgent>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.chain == chain && r.agent_id.is_zero())
            .map(|r| PlaceholderAgent {
                key: r.locator.clone(),
                source_locator: r.source_locator.clone(),
            })
            .take(limit as usize)
            .collect())
    }

    async fn delete_agent(&self, chain: &str, key: &RecordKey) -> Result<bool> {
        self.deletes
            .lock()
            .unwrap()
            .push((chain.to_string(), key.clone()));
        Ok(self
            .records
            .lock()
            .unwrap()
            .remove(&(chain.to_string(), key.storage_key()))
            .is_some())
    }
}

/// Serves agent cards and registration documents on 127.0.0.1.
///
/// - `/.well-known/agent-card.json`: `{"name": "unit-test-agent"}`
/// - `/reg.json`: registration whose A2A endpoint is this server
/// - `/reg-no-a2a.json`: registration without an A2A endpoint
///
/// Returns `host:port`.
pub async fn card_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();
    let base = format!("http://{}", authority);

    let router = Router::new().fallback(move |uri: Uri| {
        let base = base.clone();
        async move {
            match uri.path() {
                "/.well-known/agent-card.json" => {
                    Json(json!({"name": "unit-test-agent"})).into_response()
                }
                "/reg.json" => Json(json!({
                    "type": "registration",
                    "endpoints": [
                        {"name": "web", "endpoint": "https://unused.example"},
                        {"name": "A2A", "endpoint": base},
                    ]
                }))
                .into_response(),
                "/reg-no-a2a.json" => Json(json!({
                    "endpoints": [{"name": "MCP", "endpoint": "https://mcp.example"}]
                }))
                .into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }
    });

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    authority
}

/// Serves one agent card under `/agent/.well-known/agent-card.json` and
/// nothing at the root. Returns `host:port`.
pub async fn pathed_card_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();

    let router = Router::new().fallback(|uri: Uri| async move {
        match uri.path() {
            "/agent/.well-known/agent-card.json" => {
                Json(json!({"name": "pathed-agent"})).into_response()
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    });

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    authority
}

pub fn ingestor(store: Arc<dyn RecordStore>) -> Ingestor {
    let fetcher = MetadataFetcher::new(vec![], Duration::from_secs(2), 64 * 1024).unwrap();
    Ingestor::new(fetcher, store)
}

/// Poll `condition` every 10ms for up to 5s.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
