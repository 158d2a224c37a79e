mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{fund_treasury, token_account_bytes, Dao, MockLedger};
use gov_assets::{
    consts::TOKEN_PROGRAM_ID,
    price::PriceTable,
    store::LoadingFlags,
    AccountType, AssetAggregator, InventoryStore, StoreUpdate,
};
use solana_program::pubkey::Pubkey;

/// Aggregator over an empty ledger that holds every batch until opened
fn held_aggregator(dao: &Dao) -> (Arc<MockLedger>, AssetAggregator<Arc<MockLedger>>) {
    let ledger = Arc::new(MockLedger::new());
    ledger.close();
    let aggregator =
        AssetAggregator::new(ledger.clone(), &dao.config(), Arc::new(PriceTable::new()));
    (ledger, aggregator)
}

#[tokio::test]
async fn test_set_governances_skips_hidden_governances() {
    let mut dao = Dao::new();
    dao.lists.hidden_governances.insert(dao.program_gov.address.to_string());
    let aggregator = dao.aggregator();
    let store = InventoryStore::new();

    let update = store.set_governances(&aggregator, &dao.realm, dao.governances()).await;

    match update {
        StoreUpdate::Applied(reports) => assert_eq!(reports.len(), 5),
        other => panic!("unexpected {:?}", other),
    }
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.governances.len(), 1);
    assert_eq!(snapshot.governances[0].address, dao.treasury_gov.address);
    assert_eq!(snapshot.loading, LoadingFlags::default());
    assert!(snapshot.asset_accounts.iter().all(|a| a.address != dao.program_id));
    assert!(snapshot
        .asset_accounts
        .iter()
        .all(|a| a.account_type() != AccountType::Program));
    assert_eq!(snapshot.governed_token_accounts.len(), 3);
}

#[tokio::test]
async fn test_refresh_one_splices_fresh_accounts() {
    let dao = Dao::new();
    let aggregator = dao.aggregator();
    let store = InventoryStore::new();
    store.set_governances(&aggregator, &dao.realm, dao.governances()).await;
    let before = store.asset_accounts().await;

    let deposit = Pubkey::new_unique();
    dao.ledger
        .put(deposit, TOKEN_PROGRAM_ID, 1, token_account_bytes(&dao.usdc, &dao.treasury, 42));

    let update = store.refresh_one(&aggregator, &dao.realm, &dao.treasury_gov.address).await;
    assert!(matches!(update, StoreUpdate::Applied(_)), "{:?}", update);

    let after = store.asset_accounts().await;
    assert_eq!(after.len(), before.len() + 1);
    assert!(after.iter().any(|a| a.address == deposit));

    // the other governance's assets are untouched
    let program = after.iter().find(|a| a.address == dao.program_id).unwrap();
    assert_eq!(program.account_type(), AccountType::Program);
    assert_eq!(program.governance_address(), Some(dao.program_gov.address));

    let unique: HashSet<Pubkey> = after.iter().map(|a| a.address).collect();
    assert_eq!(unique.len(), after.len());
    assert_eq!(store.governed_token_accounts().await.len(), 4);
}

#[tokio::test]
async fn test_refresh_unknown_governance() {
    let dao = Dao::new();
    let aggregator = dao.aggregator();
    let store = InventoryStore::new();
    store.set_governances(&aggregator, &dao.realm, dao.governances()).await;

    let stranger = Pubkey::new_unique();
    let update = store.refresh_one(&aggregator, &dao.realm, &stranger).await;

    assert_eq!(update, StoreUpdate::UnknownGovernance(stranger));
    assert_eq!(store.generation(), 1);
}

#[tokio::test]
async fn test_stale_rebuild_is_discarded() {
    let dao = Dao::new();
    let store = InventoryStore::new();

    let (slow_ledger, slow) = held_aggregator(&dao);
    let fast = dao.aggregator();

    let (slow_update, fast_update) = tokio::join!(
        store.set_governances(&slow, &dao.realm, dao.governances()),
        async {
            while slow_ledger.held() == 0 {
                tokio::task::yield_now().await;
            }
            let snapshot = store.snapshot().await;
            assert_eq!(snapshot.generation, 1);
            assert!(snapshot.loading.token_accounts && snapshot.loading.governed_accounts);
            assert!(snapshot.asset_accounts.is_empty());

            let update = store.rebuild(&fast, &dao.realm).await;
            slow_ledger.open();
            update
        }
    );

    assert_eq!(slow_update, StoreUpdate::Superseded);
    assert!(matches!(fast_update, StoreUpdate::Applied(_)));

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.asset_accounts.len(), 8);
    assert!(!snapshot.loading.any());
}

#[tokio::test]
async fn test_concurrent_refreshes_keep_both_contributions() {
    let dao = Dao::new();
    let aggregator = dao.aggregator();
    let store = InventoryStore::new();
    store.set_governances(&aggregator, &dao.realm, dao.governances()).await;
    let before = store.asset_accounts().await.len();

    let deposit = Pubkey::new_unique();
    dao.ledger
        .put(deposit, TOKEN_PROGRAM_ID, 1, token_account_bytes(&dao.usdc, &dao.treasury, 42));
    let program_treasury = fund_treasury(&dao.ledger, &dao.program_gov, 3_000_000);

    let (a, b) = tokio::join!(
        store.refresh_one(&aggregator, &dao.realm, &dao.treasury_gov.address),
        store.refresh_one(&aggregator, &dao.realm, &dao.program_gov.address),
    );
    assert!(matches!(a, StoreUpdate::Applied(_)), "{:?}", a);
    assert!(matches!(b, StoreUpdate::Applied(_)), "{:?}", b);

    let after = store.asset_accounts().await;
    assert_eq!(after.len(), before + 2);
    let deposit = after.iter().find(|a| a.address == deposit).unwrap();
    assert_eq!(deposit.governance_address(), Some(dao.treasury_gov.address));
    let sol = after.iter().find(|a| a.address == program_treasury).unwrap();
    assert_eq!(sol.account_type(), AccountType::Sol);
    assert_eq!(sol.governance_address(), Some(dao.program_gov.address));
    assert!(after.iter().any(|a| a.address == dao.program_id));
}

#[tokio::test]
async fn test_refreshes_of_one_governance_run_one_at_a_time() {
    let dao = Dao::new();
    let aggregator = dao.aggregator();
    let store = InventoryStore::new();
    store.set_governances(&aggregator, &dao.realm, dao.governances()).await;
    let full = store.asset_accounts().await.len();

    let (slow_ledger, slow) = held_aggregator(&dao);

    let (first, second) = tokio::join!(
        store.refresh_one(&slow, &dao.realm, &dao.treasury_gov.address),
        async {
            while slow_ledger.held() == 0 {
                tokio::task::yield_now().await;
            }
            let requests = dao.ledger.request_count("getTokenAccountsByOwner");

            let second = store.refresh_one(&aggregator, &dao.realm, &dao.treasury_gov.address);
            tokio::pin!(second);
            assert!(tokio::time::timeout(Duration::from_millis(50), &mut second).await.is_err());
            assert_eq!(dao.ledger.request_count("getTokenAccountsByOwner"), requests);

            // another governance is not held up
            let other = store.refresh_one(&aggregator, &dao.realm, &dao.program_gov.address).await;
            assert!(matches!(other, StoreUpdate::Applied(_)), "{:?}", other);

            slow_ledger.open();
            second.await
        }
    );

    assert!(matches!(first, StoreUpdate::Applied(_)), "{:?}", first);
    assert!(matches!(second, StoreUpdate::Applied(_)), "{:?}", second);
    // the second refresh committed last and restored what the empty ledger dropped
    assert_eq!(store.asset_accounts().await.len(), full);
}

#[tokio::test]
async fn test_refresh_overtaken_by_rebuild_is_dropped() {
    let dao = Dao::new();
    let fast = dao.aggregator();
    let store = InventoryStore::new();
    store.set_governances(&fast, &dao.realm, dao.governances()).await;

    let (slow_ledger, slow) = held_aggregator(&dao);

    let (refresh, rebuilt) = tokio::join!(
        store.refresh_one(&slow, &dao.realm, &dao.treasury_gov.address),
        async {
            while slow_ledger.held() == 0 {
                tokio::task::yield_now().await;
            }
            let update = store.rebuild(&fast, &dao.realm).await;
            assert!(matches!(update, StoreUpdate::Applied(_)), "{:?}", update);
            let snapshot = store.snapshot().await;
            slow_ledger.open();
            snapshot
        }
    );

    assert_eq!(refresh, StoreUpdate::Superseded);
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.generation, rebuilt.generation);
    assert_eq!(snapshot.asset_accounts, rebuilt.asset_accounts);
    assert_eq!(snapshot.loading, rebuilt.loading);
    assert_eq!(snapshot.asset_accounts.len(), 8);
}
