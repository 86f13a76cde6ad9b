//! Seed crawling and placeholder upgrade.

mod common;

use agentdex_core::{RecordKey, U256, DEFAULT_SEED_CHAIN};
use agentdex_indexer::listener::registry::{IdentityRegistry, RegistryLayout};
use agentdex_indexer::reconcile::{ReconcileReport, Reconciler};
use agentdex_indexer::seeds::SeedCrawler;
use agentdex_indexer::storage::{RecordStore, Storage};
use common::{
    card_server, chain, ingestor, pathed_card_server, FakeChain, RecordingStore, REGISTRY,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn reconciler(fake: Arc<FakeChain>, store: Arc<dyn RecordStore>, layout: RegistryLayout) -> Reconciler {
    Reconciler::new(
        chain("testnet"),
        IdentityRegistry::new(fake, REGISTRY, layout),
        ingestor(store),
        DEFAULT_SEED_CHAIN,
        100,
    )
}

#[tokio::test]
async fn test_seed_crawl_stores_placeholders() {
    let host = card_server().await;
    let store = RecordingStore::new();

    let crawler = SeedCrawler::new(
        ingestor(store.clone()),
        vec![host.clone(), "127.0.0.1:9".to_string()],
        DEFAULT_SEED_CHAIN,
    );
    assert_eq!(crawler.run(&CancellationToken::new()).await, 1);

    let placeholder = store
        .get(DEFAULT_SEED_CHAIN, &RecordKey::Placeholder(host.clone()))
        .unwrap();
    assert_eq!(placeholder.agent_id, U256::ZERO);
    assert_eq!(placeholder.registry, None);
    assert_eq!(placeholder.metadata, json!({"name": "unit-test-agent"}));
}

#[tokio::test]
async fn test_seed_placeholder_upgraded_when_registered() {
    let host = card_server().await;
    let store = RecordingStore::new();

    SeedCrawler::new(ingestor(store.clone()), vec![host.clone()], DEFAULT_SEED_CHAIN)
        .run(&CancellationToken::new())
        .await;

    let fake = FakeChain::new();
    fake.set_agent(7, &host);

    let report = reconciler(fake, store.clone(), RegistryLayout::AgentInfo)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report, ReconcileReport { checked: 1, upgraded: 1 });

    assert!(store
        .get(DEFAULT_SEED_CHAIN, &RecordKey::Placeholder(host.clone()))
        .is_none());
    let record = store
        .get("testnet", &RecordKey::Agent(U256::from(7u64)))
        .unwrap();
    assert_eq!(record.locator, host);
    assert_eq!(record.registry, Some(REGISTRY));

    assert_eq!(
        store.deletes(),
        vec![(DEFAULT_SEED_CHAIN.to_string(), RecordKey::Placeholder(host))]
    );
}

#[tokio::test]
async fn test_pathed_seed_is_refetched_from_its_source() {
    let host = pathed_card_server().await;
    let seed = format!("http://{}/agent", host);
    let store = RecordingStore::new();

    let stored = SeedCrawler::new(ingestor(store.clone()), vec![seed.clone()], DEFAULT_SEED_CHAIN)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(stored, 1);

    let placeholder = store
        .get(DEFAULT_SEED_CHAIN, &RecordKey::Placeholder(host.clone()))
        .unwrap();
    assert_eq!(placeholder.locator, host);
    assert_eq!(placeholder.source_locator, seed);

    // The registry knows the agent by its authority
    let fake = FakeChain::new();
    fake.set_agent(7, &host);

    let report = reconciler(fake, store.clone(), RegistryLayout::AgentInfo)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report, ReconcileReport { checked: 1, upgraded: 1 });

    let record = store
        .get("testnet", &RecordKey::Agent(U256::from(7u64)))
        .unwrap();
    assert_eq!(record.metadata, json!({"name": "pathed-agent"}));
    assert_eq!(record.source_locator, seed);
    assert!(store
        .get(DEFAULT_SEED_CHAIN, &RecordKey::Placeholder(host))
        .is_none());
}

#[tokio::test]
async fn test_unregistered_placeholder_is_kept() {
    let host = card_server().await;
    let store = RecordingStore::new();

    SeedCrawler::new(ingestor(store.clone()), vec![host.clone()], "testnet")
        .run(&CancellationToken::new())
        .await;

    let report = reconciler(FakeChain::new(), store.clone(), RegistryLayout::AgentInfo)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report, ReconcileReport { checked: 1, upgraded: 0 });

    assert!(store
        .get("testnet", &RecordKey::Placeholder(host))
        .is_some());
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_token_uri_layout_skips_reconcile() {
    let host = card_server().await;
    let store = RecordingStore::new();

    SeedCrawler::new(ingestor(store.clone()), vec![host.clone()], DEFAULT_SEED_CHAIN)
        .run(&CancellationToken::new())
        .await;

    let fake = FakeChain::new();
    fake.set_agent(7, &host);

    let report = reconciler(fake, store.clone(), RegistryLayout::TokenUri)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report, ReconcileReport::default());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_reconcile_against_sqlite() {
    let host = card_server().await;
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::new_with_path(temp_dir.path().join("agents.db"))
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(storage.clone());

    SeedCrawler::new(ingestor(store.clone()), vec![host.clone()], DEFAULT_SEED_CHAIN)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(storage.stats().await.unwrap().placeholder_count, 1);

    let fake = FakeChain::new();
    fake.set_agent(7, &host);
    let report = reconciler(fake, store, RegistryLayout::AgentInfo)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report.upgraded, 1);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.placeholder_count, 0);
    assert_eq!(stats.agent_count, 1);

    let record = storage
        .get_agent("testnet", &RecordKey::Agent(U256::from(7u64)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.locator, host);
}

#[tokio::test]
async fn test_pathed_seed_reconciles_against_sqlite() {
    let host = pathed_card_server().await;
    let seed = format!("http://{}/agent", host);
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::new_with_path(temp_dir.path().join("agents.db"))
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(storage.clone());

    SeedCrawler::new(ingestor(store.clone()), vec![seed.clone()], DEFAULT_SEED_CHAIN)
        .run(&CancellationToken::new())
        .await;

    let fake = FakeChain::new();
    fake.set_agent(7, &host);
    let report = reconciler(fake, store, RegistryLayout::AgentInfo)
        .run(&CancellationToken::new())
        .await;
    assert_eq!(report.upgraded, 1);

    let record = storage
        .get_agent("testnet", &RecordKey::Agent(U256::from(7u64)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.locator, host);
    assert_eq!(record.source_locator, seed);
    assert_eq!(storage.stats().await.unwrap().placeholder_count, 0);
}
