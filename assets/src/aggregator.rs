//! Aggregation orchestrator.
//!
//! A full load runs the stages in order: tokens, stake, mints, programs,
//! generic. Every stage records its own failures in a [`StageReport`] and
//! contributes whatever it could classify; nothing a stage does can abort the
//! ones after it. The final inventory is deduplicated by address (first seen
//! wins) and stripped of hidden treasures.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use solana_program::pubkey::Pubkey;

use crate::{
    assets::{dedup_by_address, total_usd_value, AssetAccount},
    cache::TokenAccountCache,
    classify::{decode_token_account, ClassifyContext, Classifier},
    config::{EngineConfig, StaticLists},
    consts::{
        BPF_UPGRADEABLE_LOADER_ID, PROGRAM_DATA_ADDRESS_OFFSET, PROGRAM_DATA_AUTHORITY_OFFSET,
        PROGRAM_DATA_HEADER_LEN,
        STAKE_AUTHORIZED_OFFSET, STAKE_DELEGATED_DISCRIMINANT, STAKE_DISCRIMINANT_OFFSET,
        STAKE_INITIALIZED_DISCRIMINANT, STAKE_PROGRAM_ID, WSOL_MINT,
    },
    error::{AssetError, Stage},
    layout::{parse_loader_program_data, parse_mint, MintInfo, TokenProgram},
    price::PriceOracle,
    rpc::{
        BatchTransport, BatchedFetcher, DataSlice, Encoding, FetchKind, FetchOutcome, FetchResults,
        KeyedAccount, MemcmpFilter,
    },
    state::{with_native_treasuries, Governance, Realm},
};

/// Stage execution order for a full load
pub const STAGES: [Stage; 5] = [
    Stage::Tokens,
    Stage::Stake,
    Stage::Mints,
    Stage::Programs,
    Stage::Generic,
];

// ==================== Reports ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    /// Accounts the stage classified
    pub produced: usize,
    /// Item-level failures; the stage still contributed the rest
    pub failures: Vec<AssetError>,
    /// Set when the stage could not fetch anything at all
    pub error: Option<AssetError>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            produced: 0,
            failures: Vec::new(),
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }

    /// Mark the stage failed when every attempted lookup failed
    fn check_total_failure(&mut self, attempted: usize, failed: usize, reason: &str) {
        if attempted > 0 && failed >= attempted {
            let error = AssetError::StageFailure {
                stage: self.stage,
                reason: reason.to_string(),
            };
            tracing::error!("{}", error);
            self.error = Some(error);
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub accounts: Vec<AssetAccount>,
    pub report: StageReport,
}

impl StageOutput {
    fn new(accounts: Vec<AssetAccount>, mut report: StageReport) -> Self {
        report.produced = accounts.len();
        tracing::info!(
            "{} stage: {} accounts, {} failures",
            report.stage,
            report.produced,
            report.failures.len()
        );
        Self { accounts, report }
    }
}

/// Result of a load: the filtered inventory plus one report per stage run
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub accounts: Vec<AssetAccount>,
    pub reports: Vec<StageReport>,
}

impl Inventory {
    pub fn governed_token_accounts(&self) -> Vec<AssetAccount> {
        self.accounts.iter().filter(|a| a.is_governed_token()).cloned().collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssetError> {
        self.reports
            .iter()
            .flat_map(|r| r.error.iter().chain(r.failures.iter()))
    }
}

// ==================== Aggregator ====================

pub struct AssetAggregator<T: BatchTransport> {
    fetcher: BatchedFetcher<T>,
    lists: StaticLists,
    oracle: Arc<dyn PriceOracle>,
    token_cache: TokenAccountCache,
    classifier: Classifier,
}

impl<T: BatchTransport> AssetAggregator<T> {
    pub fn new(transport: T, config: &EngineConfig, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            fetcher: BatchedFetcher::new(transport, config.rpc.clone()),
            lists: config.lists.clone(),
            oracle,
            token_cache: TokenAccountCache::with_system_clock(Duration::from_secs(
                config.token_cache_ttl_secs,
            )),
            classifier: Classifier::default(),
        }
    }

    pub fn with_token_cache(mut self, token_cache: TokenAccountCache) -> Self {
        self.token_cache = token_cache;
        self
    }

    pub fn fetcher(&self) -> &BatchedFetcher<T> {
        &self.fetcher
    }

    pub fn lists(&self) -> &StaticLists {
        &self.lists
    }

    pub fn oracle(&self) -> &dyn PriceOracle {
        self.oracle.as_ref()
    }

    pub fn token_cache(&self) -> &TokenAccountCache {
        &self.token_cache
    }

    pub fn total_usd_value(&self, accounts: &[AssetAccount]) -> f64 {
        total_usd_value(accounts, self.oracle.as_ref())
    }

    fn context(&self, realm: &Realm, governances: &[Governance]) -> ClassifyContext {
        ClassifyContext::new(
            &with_native_treasuries(governances),
            &self.lists.auxiliary_accounts(&realm.name),
        )
    }

    /// Start a staged load. Drive it with [`AggregationPass::run`].
    pub fn begin<'a>(
        &'a self,
        realm: &'a Realm,
        governances: &[Governance],
    ) -> AggregationPass<'a, T> {
        AggregationPass {
            aggregator: self,
            realm,
            ctx: self.context(realm, governances),
            accounts: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Every stage, in order
    pub async fn load_accounts(&self, realm: &Realm, governances: &[Governance]) -> Inventory {
        let mut pass = self.begin(realm, governances);
        for stage in STAGES {
            pass.run(stage).await;
        }
        pass.into_inventory()
    }

    /// Inventory contribution of a subset of governances, used to refresh a
    /// single governance. Token, mint and program lookups run concurrently.
    pub async fn accounts_for_governances(
        &self,
        realm: &Realm,
        governances: &[Governance],
    ) -> Inventory {
        let ctx = self.context(realm, governances);

        let tokens_then_stake = async {
            let tokens = self.token_stage(realm, &ctx).await;
            let stake = self.stake_stage(&ctx, &sol_treasuries(&tokens.accounts)).await;
            (tokens, stake)
        };
        let ((tokens, stake), mints, programs) = tokio::join!(
            tokens_then_stake,
            self.mint_stage(realm, &ctx),
            self.program_stage(&ctx),
        );

        let mut accounts = Vec::new();
        accounts.extend(mints.accounts);
        accounts.extend(programs.accounts);
        accounts.extend(tokens.accounts);
        accounts.extend(stake.accounts);
        let generic = self.generic_stage(&ctx, &accounts);
        accounts.extend(generic.accounts);

        Inventory {
            accounts: self.finalize(accounts),
            reports: vec![
                tokens.report,
                stake.report,
                mints.report,
                programs.report,
                generic.report,
            ],
        }
    }

    /// Dedup by address, then drop hidden treasures
    pub fn finalize(&self, accounts: Vec<AssetAccount>) -> Vec<AssetAccount> {
        dedup_by_address(accounts)
            .into_iter()
            .filter(|a| !self.lists.is_hidden_treasure(&a.address))
            .collect()
    }

    // ==================== Stages ====================

    /// Token accounts of every treasury and auxiliary owner, treasury SOL
    /// wallets, and the mints they reference.
    pub async fn token_stage(&self, realm: &Realm, ctx: &ClassifyContext) -> StageOutput {
        let mut report = StageReport::new(Stage::Tokens);
        let treasuries: Vec<Pubkey> = ctx.governances().iter().map(|g| g.native_treasury).collect();
        let owners = unique(
            treasuries
                .iter()
                .copied()
                .chain(
                    self.lists
                        .auxiliary_accounts(&realm.name)
                        .into_iter()
                        .map(|(owner, _)| owner),
                ),
        );

        let (legacy, token_2022) = tokio::join!(
            self.token_accounts_by_owner(&owners, TokenProgram::Legacy),
            self.token_accounts_by_owner(&owners, TokenProgram::Token2022),
        );
        let failed_owners = legacy.1.len() + token_2022.1.len();
        report.failures.extend(legacy.1);
        report.failures.extend(token_2022.1);
        report.check_total_failure(
            owners.len() * 2,
            failed_owners,
            "unable to fetch token accounts",
        );

        let mut tokens = Vec::new();
        let keyed = legacy
            .0
            .iter()
            .map(|k| (k, TokenProgram::Legacy))
            .chain(token_2022.0.iter().map(|k| (k, TokenProgram::Token2022)));
        for (k, program) in keyed {
            match decode_token_account(k.pubkey, &k.account, program) {
                // empty legacy accounts are not worth a mint lookup
                Ok(token) if program == TokenProgram::Legacy && token.amount.bits() == 0 => {}
                Ok(token) => tokens.push(token),
                Err(e) => report.failures.push(e),
            }
        }

        let mint_addresses =
            unique(tokens.iter().map(|t| t.mint).chain(std::iter::once(WSOL_MINT)));
        let (mint_results, sol_results) = tokio::join!(
            self.fetcher.fetch_accounts(&mint_addresses, &FetchKind::MintAccountInfo),
            self.fetcher.fetch_accounts(&treasuries, &FetchKind::Generic(Encoding::Base64)),
        );

        let mut ctx = ctx.clone();
        ctx.add_mints(decode_mints(&mint_addresses, &mint_results, &mut report.failures));
        ctx.set_wsol_mint(ctx.mint(&WSOL_MINT).cloned());

        let mut accounts = Vec::new();
        for token in tokens {
            collect(
                self.classifier.token_account(token, &ctx),
                &mut accounts,
                &mut report.failures,
            );
        }
        for (treasury, k) in found_in_order(&treasuries, &sol_results, &mut report.failures) {
            if k.pubkey == *treasury {
                collect(
                    self.classifier.classify(k.pubkey, &k.account, &ctx),
                    &mut accounts,
                    &mut report.failures,
                );
            }
        }

        let price_mints = unique(accounts.iter().filter_map(|a| a.price_mint()));
        if let Err(e) = self.oracle.fetch_token_prices(&price_mints).await {
            tracing::warn!("Token price warm-up failed: {}", e);
        }

        StageOutput::new(accounts, report)
    }

    /// Stake accounts whose withdrawer is one of the given treasuries
    pub async fn stake_stage(&self, ctx: &ClassifyContext, treasuries: &[Pubkey]) -> StageOutput {
        let mut report = StageReport::new(Stage::Stake);
        let by_state = |discriminant: [u8; 4]| FetchKind::ProgramAccountsByFilter {
            program_id: STAKE_PROGRAM_ID,
            filters: vec![
                MemcmpFilter::fixed(STAKE_DISCRIMINANT_OFFSET, &discriminant),
                MemcmpFilter::queried_address(STAKE_AUTHORIZED_OFFSET),
            ],
            data_slice: None,
        };
        let inactive_kind = by_state(STAKE_INITIALIZED_DISCRIMINANT);
        let active_kind = by_state(STAKE_DELEGATED_DISCRIMINANT);

        let (inactive, active) = tokio::join!(
            self.fetcher.fetch_accounts(treasuries, &inactive_kind),
            self.fetcher.fetch_accounts(treasuries, &active_kind),
        );
        let failed = inactive.failures().len() + active.failures().len();
        report.check_total_failure(treasuries.len() * 2, failed, "unable to fetch stake accounts");

        let mut accounts = Vec::new();
        for results in [&inactive, &active] {
            for (_, k) in found_in_order(treasuries, results, &mut report.failures) {
                collect(
                    self.classifier.classify(k.pubkey, &k.account, ctx),
                    &mut accounts,
                    &mut report.failures,
                );
            }
        }

        StageOutput::new(accounts, report)
    }

    /// Community mint, council mint and the DAO's extra mints, kept when their
    /// mint authority resolves to a governance or treasury.
    pub async fn mint_stage(&self, realm: &Realm, ctx: &ClassifyContext) -> StageOutput {
        let mut report = StageReport::new(Stage::Mints);
        let candidates = unique(
            std::iter::once(realm.community_mint)
                .chain(realm.council_mint)
                .chain(self.lists.extra_mints(&realm.name)),
        );

        let results = self.fetcher.fetch_accounts(&candidates, &FetchKind::MintAccountInfo).await;
        report.check_total_failure(
            candidates.len(),
            results.failures().len(),
            "unable to fetch mints",
        );

        let accounts = decode_mints(&candidates, &results, &mut report.failures)
            .into_iter()
            .filter_map(|mint| self.classifier.mint(mint, ctx))
            .collect();

        StageOutput::new(accounts, report)
    }

    /// Two hops on the upgradeable loader: program-data accounts whose
    /// authority is a treasury or program governance, then the program
    /// accounts pointing at them.
    pub async fn program_stage(&self, ctx: &ClassifyContext) -> StageOutput {
        let mut report = StageReport::new(Stage::Programs);
        let owners = unique(
            ctx.governances().iter().map(|g| g.native_treasury).chain(
                ctx.governances()
                    .iter()
                    .filter(|g| g.governance.account_type.is_program_governance())
                    .map(|g| g.governance.address),
            ),
        );
        let lookup = |offset: usize, length: usize| FetchKind::ProgramAccountsByFilter {
            program_id: BPF_UPGRADEABLE_LOADER_ID,
            filters: vec![MemcmpFilter::queried_address(offset)],
            data_slice: Some(DataSlice { offset: 0, length }),
        };

        let program_data = self
            .fetcher
            .fetch_accounts(
                &owners,
                &lookup(PROGRAM_DATA_AUTHORITY_OFFSET, PROGRAM_DATA_HEADER_LEN),
            )
            .await;
        report.check_total_failure(
            owners.len(),
            program_data.failures().len(),
            "unable to fetch programs owned by DAO",
        );

        let mut ctx = ctx.clone();
        let mut program_data_addresses = Vec::new();
        for (authority, k) in found_in_order(&owners, &program_data, &mut report.failures) {
            // a program made immutable keeps its former authority bytes after the None tag
            match parse_loader_program_data(&k.account.data) {
                Some(Some(upgrade_authority)) if upgrade_authority == *authority => {
                    ctx.add_program_data_authority(k.pubkey, *authority);
                    program_data_addresses.push(k.pubkey);
                }
                _ => tracing::warn!(
                    "{} is not program data upgradeable by {}",
                    k.pubkey,
                    authority
                ),
            }
        }

        let programs = self
            .fetcher
            .fetch_accounts(&program_data_addresses, &lookup(PROGRAM_DATA_ADDRESS_OFFSET, 0))
            .await;

        let mut accounts = Vec::new();
        for (program_data, k) in
            found_in_order(&program_data_addresses, &programs, &mut report.failures)
        {
            let program = ctx
                .program_data_authority(program_data)
                .and_then(|authority| self.classifier.program(k.pubkey, authority, &ctx));
            accounts.extend(program);
        }

        StageOutput::new(accounts, report)
    }

    /// Placeholders for governed accounts no other stage produced
    pub fn generic_stage(&self, ctx: &ClassifyContext, produced: &[AssetAccount]) -> StageOutput {
        let seen: HashSet<Pubkey> = produced.iter().map(|a| a.address).collect();
        let accounts = ctx
            .governances()
            .iter()
            .filter(|g| !seen.contains(&g.governance.governed_account))
            .map(|g| self.classifier.generic(g))
            .collect();
        StageOutput::new(accounts, StageReport::new(Stage::Generic))
    }

    /// Token accounts per owner, from the cache when fresh. Returns the
    /// accounts in owner order plus one failure per owner that could not be
    /// fetched.
    async fn token_accounts_by_owner(
        &self,
        owners: &[Pubkey],
        program: TokenProgram,
    ) -> (Vec<KeyedAccount>, Vec<AssetError>) {
        let program_id = program.program_id();
        let encoding = match program {
            TokenProgram::Legacy => Encoding::Base64,
            TokenProgram::Token2022 => Encoding::JsonParsed,
        };

        let mut per_owner: Vec<Option<Vec<KeyedAccount>>> = Vec::with_capacity(owners.len());
        let mut misses = Vec::new();
        for owner in owners {
            let cached = self.token_cache.get(owner, &program_id).await;
            if cached.is_none() {
                misses.push(*owner);
            }
            per_owner.push(cached);
        }

        let mut failures = Vec::new();
        if !misses.is_empty() {
            let results = self
                .fetcher
                .fetch_accounts(&misses, &FetchKind::TokenAccountsByOwner { program_id, encoding })
                .await;
            for (owner, slot) in owners.iter().zip(per_owner.iter_mut()) {
                if slot.is_some() {
                    continue;
                }
                match results.get(owner) {
                    Some(FetchOutcome::Found(list)) => {
                        self.token_cache.insert(*owner, program_id, list.clone()).await;
                        *slot = Some(list.clone());
                    }
                    Some(FetchOutcome::Missing) => {
                        self.token_cache.insert(*owner, program_id, Vec::new()).await;
                    }
                    Some(FetchOutcome::Failed(e)) => failures.push(AssetError::FetchFailure {
                        address: *owner,
                        source: e.clone(),
                    }),
                    None => {}
                }
            }
        }

        (per_owner.into_iter().flatten().flatten().collect(), failures)
    }
}

// ==================== Pass ====================

/// One staged load in progress. The store commits [`AggregationPass::accounts`]
/// after each stage.
pub struct AggregationPass<'a, T: BatchTransport> {
    aggregator: &'a AssetAggregator<T>,
    realm: &'a Realm,
    ctx: ClassifyContext,
    accounts: Vec<AssetAccount>,
    reports: Vec<StageReport>,
}

impl<'a, T: BatchTransport> AggregationPass<'a, T> {
    pub async fn run(&mut self, stage: Stage) -> StageReport {
        let aggregator = self.aggregator;
        let output = match stage {
            Stage::Tokens => aggregator.token_stage(self.realm, &self.ctx).await,
            Stage::Stake => {
                let treasuries = sol_treasuries(&self.accounts);
                aggregator.stake_stage(&self.ctx, &treasuries).await
            }
            Stage::Mints => aggregator.mint_stage(self.realm, &self.ctx).await,
            Stage::Programs => aggregator.program_stage(&self.ctx).await,
            Stage::Generic => aggregator.generic_stage(&self.ctx, &self.accounts),
        };
        self.accounts.extend(output.accounts);
        self.reports.push(output.report.clone());
        output.report
    }

    /// Inventory so far, deduplicated and filtered
    pub fn accounts(&self) -> Vec<AssetAccount> {
        self.aggregator.finalize(self.accounts.clone())
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn into_inventory(self) -> Inventory {
        Inventory {
            accounts: self.aggregator.finalize(self.accounts),
            reports: self.reports,
        }
    }
}

// ==================== Helpers ====================

fn unique(keys: impl IntoIterator<Item = Pubkey>) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(*k)).collect()
}

fn sol_treasuries(accounts: &[AssetAccount]) -> Vec<Pubkey> {
    unique(accounts.iter().filter(|a| a.is_sol()).map(|a| a.transfer_address()))
}

fn collect(
    result: Result<Option<AssetAccount>, AssetError>,
    accounts: &mut Vec<AssetAccount>,
    failures: &mut Vec<AssetError>,
) {
    match result {
        Ok(Some(account)) => accounts.push(account),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("{}", e);
            failures.push(e);
        }
    }
}

/// Found accounts in query order, paired with the address queried. Failed
/// lookups are recorded.
fn found_in_order<'r>(
    queried: &'r [Pubkey],
    results: &'r FetchResults,
    failures: &mut Vec<AssetError>,
) -> Vec<(&'r Pubkey, &'r KeyedAccount)> {
    let mut found = Vec::new();
    for address in queried {
        match results.get(address) {
            Some(FetchOutcome::Found(list)) => found.extend(list.iter().map(|k| (address, k))),
            Some(FetchOutcome::Failed(e)) => failures.push(AssetError::FetchFailure {
                address: *address,
                source: e.clone(),
            }),
            Some(FetchOutcome::Missing) | None => {}
        }
    }
    found
}

fn decode_mints(
    addresses: &[Pubkey],
    results: &FetchResults,
    failures: &mut Vec<AssetError>,
) -> Vec<MintInfo> {
    let mut mints = Vec::new();
    for (address, k) in found_in_order(addresses, results, failures) {
        let Some(program) = TokenProgram::from_owner(&k.account.owner) else {
            failures.push(AssetError::Decode {
                kind: "mint",
                address: *address,
                reason: format!("owned by {}", k.account.owner),
            });
            continue;
        };
        match parse_mint(*address, &k.account.data, program) {
            Ok(mint) => mints.push(mint),
            Err(reason) => failures.push(AssetError::Decode {
                kind: "mint",
                address: *address,
                reason,
            }),
        }
    }
    mints
}
