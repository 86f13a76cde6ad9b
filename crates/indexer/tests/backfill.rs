//! Registry enumeration for both layouts.

mod common;

use agentdex_core::{RecordKey, U256};
use agentdex_indexer::backfill::{BackfillReport, Backfiller};
use agentdex_indexer::listener::registry::{IdentityRegistry, RegistryLayout};
use common::{card_server, chain, ingestor, FakeChain, RecordingStore, REGISTRY};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_backfill_agent_info_layout() {
    let host = card_server().await;
    let fake = FakeChain::new();
    fake.set_agent(1, &host);
    fake.set_agent(2, "");
    fake.set_agent(3, &format!("http://{}", host));
    let store = RecordingStore::new();

    let registry = IdentityRegistry::new(fake.clone(), REGISTRY, RegistryLayout::AgentInfo);
    let backfiller = Backfiller::new(chain("testnet"), registry, ingestor(store.clone()));

    let report = backfiller.run(&CancellationToken::new()).await;
    assert_eq!(
        report,
        BackfillReport {
            total: 3,
            stored: 2,
            skipped: 1,
            failed: 0,
        }
    );

    for id in [1u64, 3] {
        let record = store
            .get("testnet", &RecordKey::Agent(U256::from(id)))
            .unwrap();
        assert_eq!(record.locator, host);
        assert_eq!(record.registry, Some(REGISTRY));
    }
    assert!(store
        .get("testnet", &RecordKey::Agent(U256::from(2u64)))
        .is_none());
}

#[tokio::test]
async fn test_backfill_token_uri_layout_resolves_registrations() {
    let host = card_server().await;
    let fake = FakeChain::new();
    fake.set_agent(1, &format!("http://{}/reg.json", host));
    fake.set_agent(2, &format!("http://{}/reg-no-a2a.json", host));
    let store = RecordingStore::new();

    let registry = IdentityRegistry::new(fake.clone(), REGISTRY, RegistryLayout::TokenUri);
    let backfiller = Backfiller::new(chain("testnet"), registry, ingestor(store.clone()));

    let report = backfiller.run(&CancellationToken::new()).await;
    assert_eq!(report.total, 2);
    assert_eq!(report.stored, 1);
    assert_eq!(report.skipped, 1);

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].agent_id, U256::from(1u64));
    assert_eq!(upserts[0].locator, host);
}

#[tokio::test]
async fn test_backfill_unreachable_cards_count_as_failed() {
    let fake = FakeChain::new();
    fake.set_agent(1, "127.0.0.1:9");
    let store = RecordingStore::new();

    let registry = IdentityRegistry::new(fake, REGISTRY, RegistryLayout::AgentInfo);
    let report = Backfiller::new(chain("testnet"), registry, ingestor(store.clone()))
        .run(&CancellationToken::new())
        .await;

    assert_eq!(report.total, 1);
    assert_eq!(report.failed, 1);
    assert!(store.upserts().is_empty());
}

#[tokio::test]
async fn test_backfill_empty_registry() {
    let store = RecordingStore::new();
    let registry = IdentityRegistry::new(FakeChain::new(), REGISTRY, RegistryLayout::AgentInfo);

    let report = Backfiller::new(chain("testnet"), registry, ingestor(store.clone()))
        .run(&CancellationToken::new())
        .await;

    assert_eq!(report, BackfillReport::default());
    assert!(store.upserts().is_empty());
}

#[tokio::test]
async fn test_backfill_stops_when_cancelled() {
    let host = card_server().await;
    let fake = FakeChain::new();
    for id in 1..=5 {
        fake.set_agent(id, &host);
    }
    let store = RecordingStore::new();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let registry = IdentityRegistry::new(fake, REGISTRY, RegistryLayout::AgentInfo);
    let report = Backfiller::new(chain("testnet"), registry, ingestor(store.clone()))
        .run(&cancel)
        .await;

    assert_eq!(report.stored, 0);
    assert!(store.upserts().is_empty());
}
