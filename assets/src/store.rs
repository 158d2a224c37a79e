//! Inventory store: the last known asset inventory of one DAO.
//!
//! Rebuilds commit after every stage so readers see partial results early.
//! Each rebuild takes a new generation; a commit whose generation is no longer
//! current is dropped, so a slow rebuild can never overwrite a newer one.
//! Single-governance refreshes are serialized per governance address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use solana_program::pubkey::Pubkey;
use tokio::sync::{Mutex, RwLock};

use crate::{
    aggregator::{AssetAggregator, StageReport, STAGES},
    assets::AssetAccount,
    error::Stage,
    rpc::BatchTransport,
    state::{derive_native_treasury, Governance, Realm},
};

/// Which parts of the inventory are still being loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    pub governed_accounts: bool,
    pub token_accounts: bool,
    pub mint_accounts: bool,
    pub program_accounts: bool,
}

impl LoadingFlags {
    fn all() -> Self {
        Self {
            governed_accounts: true,
            token_accounts: true,
            mint_accounts: true,
            program_accounts: true,
        }
    }

    fn finish(&mut self, stage: Stage) {
        match stage {
            // token accounts are reported once their stake accounts are in
            Stage::Tokens => {}
            Stage::Stake => self.token_accounts = false,
            Stage::Mints => self.mint_accounts = false,
            Stage::Programs => self.program_accounts = false,
            Stage::Generic => self.governed_accounts = false,
        }
    }

    pub fn any(&self) -> bool {
        self.governed_accounts || self.token_accounts || self.mint_accounts || self.program_accounts
    }
}

#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub generation: u64,
    pub governances: Vec<Governance>,
    pub asset_accounts: Vec<AssetAccount>,
    /// Token, NFT and SOL accounts of `asset_accounts`
    pub governed_token_accounts: Vec<AssetAccount>,
    pub loading: LoadingFlags,
    pub reports: Vec<StageReport>,
}

impl InventorySnapshot {
    fn set_accounts(&mut self, accounts: Vec<AssetAccount>) {
        self.governed_token_accounts =
            accounts.iter().filter(|a| a.is_governed_token()).cloned().collect();
        self.asset_accounts = accounts;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    Applied(Vec<StageReport>),
    /// A newer rebuild started while this update was in flight
    Superseded,
    UnknownGovernance(Pubkey),
}

#[derive(Default)]
pub struct InventoryStore {
    state: RwLock<InventorySnapshot>,
    generation: AtomicU64,
    refresh_locks: Mutex<HashMap<Pubkey, Arc<Mutex<()>>>>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> InventorySnapshot {
        self.state.read().await.clone()
    }

    pub async fn asset_accounts(&self) -> Vec<AssetAccount> {
        self.state.read().await.asset_accounts.clone()
    }

    pub async fn governed_token_accounts(&self) -> Vec<AssetAccount> {
        self.state.read().await.governed_token_accounts.clone()
    }

    pub async fn loading(&self) -> LoadingFlags {
        self.state.read().await.loading
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the governance set, minus hidden governances, and rebuild
    pub async fn set_governances<T: BatchTransport>(
        &self,
        aggregator: &AssetAggregator<T>,
        realm: &Realm,
        governances: Vec<Governance>,
    ) -> StoreUpdate {
        let visible: Vec<Governance> = governances
            .into_iter()
            .filter(|g| !aggregator.lists().is_hidden_governance(&g.address))
            .collect();
        tracing::info!("Loading {} governances of realm {}", visible.len(), realm.name);

        self.refresh_locks
            .lock()
            .await
            .retain(|address, _| visible.iter().any(|g| g.address == *address));
        self.run_rebuild(aggregator, realm, Some(visible)).await
    }

    /// Wholesale rebuild from the current governance set
    pub async fn rebuild<T: BatchTransport>(
        &self,
        aggregator: &AssetAggregator<T>,
        realm: &Realm,
    ) -> StoreUpdate {
        self.run_rebuild(aggregator, realm, None).await
    }

    async fn run_rebuild<T: BatchTransport>(
        &self,
        aggregator: &AssetAggregator<T>,
        realm: &Realm,
        replace: Option<Vec<Governance>>,
    ) -> StoreUpdate {
        let (generation, governances) = {
            let mut state = self.state.write().await;
            if let Some(governances) = replace {
                state.governances = governances;
            }
            // bumped under the lock so the snapshot never lags the counter
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.generation = generation;
            state.loading = LoadingFlags::all();
            state.set_accounts(Vec::new());
            state.reports.clear();
            (generation, state.governances.clone())
        };
        let pruned = aggregator.token_cache().prune().await;
        if pruned > 0 {
            tracing::debug!("Pruned {} stale token account entries", pruned);
        }

        let mut pass = aggregator.begin(realm, &governances);
        for stage in STAGES {
            let report = pass.run(stage).await;
            let accounts = pass.accounts();

            let mut state = self.state.write().await;
            if self.generation() != generation {
                tracing::info!("Rebuild {} superseded during {} stage", generation, stage);
                return StoreUpdate::Superseded;
            }
            state.set_accounts(accounts);
            state.loading.finish(stage);
            state.reports.push(report);
        }

        StoreUpdate::Applied(pass.reports().to_vec())
    }

    /// Reload one governance and splice its contribution into the inventory
    pub async fn refresh_one<T: BatchTransport>(
        &self,
        aggregator: &AssetAggregator<T>,
        realm: &Realm,
        governance: &Pubkey,
    ) -> StoreUpdate {
        let lock = self.refresh_lock(governance).await;
        let _guard = lock.lock().await;

        let (generation, governances) = {
            let state = self.state.read().await;
            let selected: Vec<Governance> = state
                .governances
                .iter()
                .filter(|g| g.address == *governance)
                .cloned()
                .collect();
            (state.generation, selected)
        };
        if governances.is_empty() {
            tracing::warn!("Refresh requested for unknown governance {}", governance);
            return StoreUpdate::UnknownGovernance(*governance);
        }

        for g in &governances {
            aggregator
                .token_cache()
                .invalidate(&derive_native_treasury(&g.address, &g.program_id))
                .await;
        }
        let fresh = aggregator.accounts_for_governances(realm, &governances).await;

        let mut state = self.state.write().await;
        if self.generation() != generation {
            tracing::info!("Refresh of {} superseded by rebuild", governance);
            return StoreUpdate::Superseded;
        }
        let merged: Vec<AssetAccount> = state
            .asset_accounts
            .iter()
            .filter(|a| !a.is_owned_by(governance))
            .cloned()
            .chain(fresh.accounts)
            .collect();
        state.set_accounts(aggregator.finalize(merged));
        state.loading.governed_accounts = false;

        StoreUpdate::Applied(fresh.reports)
    }

    async fn refresh_lock(&self, governance: &Pubkey) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(*governance).or_default().clone()
    }
}
