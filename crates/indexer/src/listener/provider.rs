//! Chain access for the identity registry watchers.
//!
//! [`ChainClient`] is the narrow capability every component reads the chain
//! through: log subscription, log range queries, head number and raw
//! `eth_call`. [`AlloyChainClient`] implements it on an alloy provider, and
//! a [`ChainConnector`] dials one per endpoint.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::BoxTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;

/// Error message fragments meaning "this endpoint cannot push logs".
///
/// Matched case-insensitively against the full error chain. Providers phrase
/// this differently, so the list is a heuristic.
pub const SUBSCRIPTION_UNSUPPORTED_MARKERS: &[&str] = &[
    "notifications not supported",
    "subscriptions are not available",
    "pubsub",
    "not supported",
];

/// A log as delivered by the chain, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,

    /// Topic hashes, signature first
    pub topics: Vec<B256>,

    /// ABI-encoded non-indexed fields
    pub data: Bytes,

    /// Block the log was included in
    pub block_number: Option<u64>,

    /// Transaction hash
    pub tx_hash: Option<B256>,

    /// Log index within the block
    pub log_index: Option<u64>,
}

impl RawLog {
    /// Build a log without block coordinates.
    pub fn new(address: Address, topics: Vec<B256>, data: Bytes) -> Self {
        Self {
            address,
            topics,
            data,
            block_number: None,
            tx_hash: None,
            log_index: None,
        }
    }

    /// Set the block number.
    pub fn at_block(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Live log feed. Ends when the underlying subscription closes.
pub type LogStream = BoxStream<'static, Result<RawLog>>;

/// Read access to one network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Open a live subscription for logs emitted by `address`.
    async fn subscribe_logs(&self, address: Address) -> Result<LogStream>;

    /// Logs emitted by `address` in the inclusive block range, in chain order.
    async fn filter_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>>;

    /// Latest block number.
    async fn current_block_number(&self) -> Result<u64>;

    /// Raw `eth_call` against the latest block.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes>;
}

/// Whether a subscription error means the endpoint only supports polling.
pub fn is_subscription_unsupported(err: &anyhow::Error) -> bool {
    let message = format!("{:#}", err).to_lowercase();
    SUBSCRIPTION_UNSUPPORTED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// [`ChainClient`] backed by an alloy provider.
///
/// The transport is picked from the endpoint: http(s), ws(s) or an IPC path.
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: RootProvider<BoxTransport>,
    endpoint: String,
}

impl AlloyChainClient {
    /// Connect to an RPC endpoint.
    pub async fn dial(endpoint: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .on_builtin(endpoint)
            .await
            .with_context(|| format!("Failed to connect to RPC endpoint: {}", endpoint))?;

        Ok(Self {
            provider,
            endpoint: endpoint.to_string(),
        })
    }

    /// Endpoint this client was dialed with.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn subscribe_logs(&self, address: Address) -> Result<LogStream> {
        let filter = Filter::new().address(address);

        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .context("Failed to subscribe to registry logs")?;

        Ok(subscription
            .into_stream()
            .map(|log| Ok(RawLog::from(log)))
            .boxed())
    }

    async fn filter_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);

        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {}..={}", from_block, to_block))?;

        Ok(logs.into_iter().map(RawLog::from).collect())
    }

    async fn current_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(calldata));

        self.provider
            .call(&request)
            .await
            .with_context(|| format!("eth_call to {} failed", to))
    }
}

/// Opens a [`ChainClient`] for an RPC endpoint.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Dial `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>>;
}

/// Dials [`AlloyChainClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlloyConnector;

#[async_trait]
impl ChainConnector for AlloyConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>> {
        Ok(Arc::new(AlloyChainClient::dial(endpoint).await?))
    }
}
