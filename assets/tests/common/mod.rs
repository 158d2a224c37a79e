//! In-memory ledger answering the JSON-RPC methods the engine uses.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use gov_assets::{
    consts::{
        BPF_UPGRADEABLE_LOADER_ID, DEFAULT_GOVERNANCE_PROGRAM_ID, STAKE_PROGRAM_ID,
        SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID, WSOL_MINT,
    },
    error::FetchError,
    rpc::BatchTransport,
    state::{derive_native_treasury, Governance, GovernanceAccountType, Realm},
};
use serde_json::{json, Value};
use solana_program::pubkey::Pubkey;
use spl_token::solana_program::{
    program_option::COption, program_pack::Pack, pubkey::Pubkey as SplPubkey,
};
use spl_token::state::{Account as SplAccount, AccountState, Mint as SplMint};
use tokio::sync::Semaphore;

#[derive(Clone, Debug)]
pub struct LedgerAccount {
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

pub struct MockLedger {
    pub accounts: Mutex<BTreeMap<Pubkey, LedgerAccount>>,
    /// (method, id) pairs answered with a JSON-RPC error
    pub failing: Mutex<HashSet<(String, String)>>,
    pub requests: Mutex<Vec<(String, String)>>,
    gated: AtomicBool,
    gate: Semaphore,
    held: AtomicUsize,
    parsed_served: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self {
            accounts: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            held: AtomicUsize::new(0),
            parsed_served: AtomicUsize::new(0),
        }
    }
}

impl MockLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        // wrapped SOL always exists
        ledger.put(WSOL_MINT, TOKEN_PROGRAM_ID, 1, mint_bytes(None, 0, 9));
        ledger
    }

    pub fn put(&self, address: Pubkey, owner: Pubkey, lamports: u64, data: Vec<u8>) {
        self.accounts
            .lock()
            .unwrap()
            .insert(address, LedgerAccount { owner, lamports, data });
    }

    pub fn fail(&self, method: &str, id: &Pubkey) {
        self.failing
            .lock()
            .unwrap()
            .insert((method.to_string(), id.to_string()));
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Hold every batch until [`MockLedger::open`] is called
    pub fn close(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Batches currently held at the gate
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Token accounts answered in `jsonParsed` form
    pub fn parsed_served(&self) -> usize {
        self.parsed_served.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(10_000);
    }

    fn answer(&self, request: &Value) -> Value {
        let method = request["method"].as_str().unwrap().to_string();
        let id = request["id"].as_str().unwrap().to_string();
        self.requests.lock().unwrap().push((method.clone(), id.clone()));

        if self.failing.lock().unwrap().contains(&(method.clone(), id.clone())) {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32005, "message": "node is behind" }
            });
        }

        let params = &request["params"];
        let accounts = self.accounts.lock().unwrap();
        let result = match method.as_str() {
            "getAccountInfo" => {
                let address: Pubkey = params[0].as_str().unwrap().parse().unwrap();
                let value = accounts
                    .get(&address)
                    .map(|a| ui_account(a, None))
                    .unwrap_or(Value::Null);
                json!({ "context": { "slot": 1 }, "value": value })
            }
            "getTokenAccountsByOwner" => {
                let owner: Pubkey = params[0].as_str().unwrap().parse().unwrap();
                let program: Pubkey = params[1]["programId"].as_str().unwrap().parse().unwrap();
                let json_parsed = params[2]["encoding"].as_str() == Some("jsonParsed");
                let value: Vec<Value> = accounts
                    .iter()
                    .filter(|(_, a)| {
                        a.owner == program
                            && a.data.len() >= 64
                            && a.data[32..64] == owner.to_bytes()
                    })
                    .map(|(k, a)| {
                        let account = if json_parsed {
                            self.parsed_served.fetch_add(1, Ordering::SeqCst);
                            parsed_token_account(a)
                        } else {
                            ui_account(a, None)
                        };
                        json!({ "pubkey": k.to_string(), "account": account })
                    })
                    .collect();
                json!({ "context": { "slot": 1 }, "value": value })
            }
            "getProgramAccounts" => {
                let program: Pubkey = params[0].as_str().unwrap().parse().unwrap();
                let config = &params[1];
                let filters: Vec<(usize, Vec<u8>)> = config["filters"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|f| {
                        let offset = f["memcmp"]["offset"].as_u64().unwrap() as usize;
                        let bytes = bs58::decode(f["memcmp"]["bytes"].as_str().unwrap())
                            .into_vec()
                            .unwrap();
                        (offset, bytes)
                    })
                    .collect();
                let slice = config.get("dataSlice").map(|s| {
                    (s["offset"].as_u64().unwrap() as usize, s["length"].as_u64().unwrap() as usize)
                });
                let matches: Vec<Value> = accounts
                    .iter()
                    .filter(|(_, a)| a.owner == program)
                    .filter(|(_, a)| {
                        filters.iter().all(|(offset, bytes)| {
                            a.data.get(*offset..offset + bytes.len()) == Some(&bytes[..])
                        })
                    })
                    .map(|(k, a)| {
                        json!({ "pubkey": k.to_string(), "account": ui_account(a, slice) })
                    })
                    .collect();
                Value::Array(matches)
            }
            other => panic!("unexpected method {}", other),
        };
        json!({ "jsonrpc": "2.0", "id": id, "result": result })
    }
}

#[async_trait]
impl BatchTransport for MockLedger {
    async fn post_batch(&self, body: Vec<Value>) -> Result<Vec<Value>, FetchError> {
        if self.gated.load(Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(body.iter().map(|r| self.answer(r)).collect())
    }
}

fn ui_account(account: &LedgerAccount, slice: Option<(usize, usize)>) -> Value {
    let data = match slice {
        Some((offset, length)) => account.data.iter().skip(offset).take(length).copied().collect(),
        None => account.data.clone(),
    };
    json!({
        "data": [base64::engine::general_purpose::STANDARD.encode(data), "base64"],
        "lamports": account.lamports,
        "owner": account.owner.to_string(),
        "executable": account.owner == BPF_UPGRADEABLE_LOADER_ID,
        "rentEpoch": 0
    })
}

/// `jsonParsed` rendering of a token-2022 account, as the node reports it
fn parsed_token_account(account: &LedgerAccount) -> Value {
    let base = SplAccount::unpack(&account.data[..SplAccount::LEN]).unwrap();
    let state = match base.state {
        AccountState::Frozen => "frozen",
        _ => "initialized",
    };
    let extensions: Vec<Value> = if account.data.len() > SplAccount::LEN {
        vec![json!({ "extension": "immutableOwner" })]
    } else {
        Vec::new()
    };
    json!({
        "data": {
            "program": "spl-token-2022",
            "parsed": {
                "type": "account",
                "info": {
                    "mint": base.mint.to_string(),
                    "owner": base.owner.to_string(),
                    "tokenAmount": { "amount": base.amount.to_string(), "decimals": 6 },
                    "state": state,
                    "isNative": false,
                    "extensions": extensions,
                }
            },
            "space": account.data.len()
        },
        "lamports": account.lamports,
        "owner": account.owner.to_string(),
        "executable": false,
        "rentEpoch": 0
    })
}

// ==================== Account builders ====================

fn spl(key: &Pubkey) -> SplPubkey {
    SplPubkey::new_from_array(key.to_bytes())
}

pub fn token_account_bytes(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let account = SplAccount {
        mint: spl(mint),
        owner: spl(owner),
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; SplAccount::LEN];
    SplAccount::pack(account, &mut data).unwrap();
    data
}

/// Token-2022 account: base layout, account type byte, immutableOwner extension
pub fn token_2022_account_bytes(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let mut data = token_account_bytes(mint, owner, amount);
    data.push(2);
    data.extend_from_slice(&7u16.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data
}

pub fn mint_bytes(authority: Option<&Pubkey>, supply: u64, decimals: u8) -> Vec<u8> {
    let mint = SplMint {
        mint_authority: authority.map(spl).map(COption::Some).unwrap_or(COption::None),
        supply,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    let mut data = vec![0u8; SplMint::LEN];
    SplMint::pack(mint, &mut data).unwrap();
    data
}

pub fn stake_bytes(
    discriminant: [u8; 4],
    withdrawer: &Pubkey,
    validator: Option<&Pubkey>,
) -> Vec<u8> {
    let mut data = vec![0u8; 200];
    data[0..4].copy_from_slice(&discriminant);
    data[12..44].copy_from_slice(withdrawer.as_ref());
    data[44..76].copy_from_slice(withdrawer.as_ref());
    if let Some(v) = validator {
        data[124..156].copy_from_slice(v.as_ref());
    }
    data
}

pub fn program_bytes(program_data: &Pubkey) -> Vec<u8> {
    let mut data = vec![2, 0, 0, 0];
    data.extend_from_slice(program_data.as_ref());
    data
}

pub fn program_data_bytes(authority: &Pubkey) -> Vec<u8> {
    let mut data = vec![3, 0, 0, 0];
    data.extend_from_slice(&1_000u64.to_le_bytes());
    data.push(1);
    data.extend_from_slice(authority.as_ref());
    data.extend_from_slice(&[0u8; 64]);
    data
}

/// Program data after the authority was removed: tag 0, stale key bytes left behind
pub fn immutable_program_data_bytes(former_authority: &Pubkey) -> Vec<u8> {
    let mut data = vec![3, 0, 0, 0];
    data.extend_from_slice(&1_000u64.to_le_bytes());
    data.push(0);
    data.extend_from_slice(former_authority.as_ref());
    data.extend_from_slice(&[0u8; 64]);
    data
}

/// Realm V2 account: header, config without council, name, then padding
pub fn realm_account_bytes(community_mint: &Pubkey, name: &str) -> Vec<u8> {
    let mut data = vec![u8::from(GovernanceAccountType::RealmV2)];
    data.extend_from_slice(community_mint.as_ref());
    // legacy bytes, reserved, min weight, supply fraction source, no council
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&1u64.to_le_bytes());
    data.push(0);
    data.extend_from_slice(&10_000_000_000u64.to_le_bytes());
    data.push(0);
    // reserved, legacy voting weight, no authority
    data.extend_from_slice(&[0u8; 8]);
    data.push(0);
    data.extend_from_slice(&(name.len() as u32).to_le_bytes());
    data.extend_from_slice(name.as_bytes());
    data.extend_from_slice(&[0u8; 64]);
    data
}

pub fn governance_account_bytes(
    account_type: GovernanceAccountType,
    realm: &Pubkey,
    governed_account: &Pubkey,
) -> Vec<u8> {
    let mut data = vec![u8::from(account_type)];
    data.extend_from_slice(realm.as_ref());
    data.extend_from_slice(governed_account.as_ref());
    data.extend_from_slice(&[0u8; 40]);
    data
}

// ==================== Fixtures ====================

pub fn realm(name: &str, community_mint: Pubkey) -> Realm {
    Realm {
        address: Pubkey::new_unique(),
        program_id: DEFAULT_GOVERNANCE_PROGRAM_ID,
        name: name.to_string(),
        community_mint,
        council_mint: None,
    }
}

pub fn governance(
    realm: &Realm,
    account_type: GovernanceAccountType,
    governed_account: Pubkey,
) -> Governance {
    Governance {
        address: Pubkey::new_unique(),
        program_id: DEFAULT_GOVERNANCE_PROGRAM_ID,
        realm: realm.address,
        governed_account,
        account_type,
    }
}

pub fn treasury(governance: &Governance) -> Pubkey {
    derive_native_treasury(&governance.address, &governance.program_id)
}

/// Fund a governance's treasury wallet
pub fn fund_treasury(ledger: &MockLedger, governance: &Governance, lamports: u64) -> Pubkey {
    let treasury = treasury(governance);
    ledger.put(treasury, SYSTEM_PROGRAM_ID, lamports, vec![]);
    treasury
}

pub fn add_stake(
    ledger: &MockLedger,
    discriminant: [u8; 4],
    withdrawer: &Pubkey,
    lamports: u64,
) -> Pubkey {
    let address = Pubkey::new_unique();
    let validator = Pubkey::new_unique();
    let data = stake_bytes(discriminant, withdrawer, Some(&validator));
    ledger.put(address, STAKE_PROGRAM_ID, lamports, data);
    address
}

/// Deploy an upgradeable program whose upgrade authority is `authority`
pub fn add_program(ledger: &MockLedger, authority: &Pubkey) -> Pubkey {
    let program_id = Pubkey::new_unique();
    let program_data = Pubkey::new_unique();
    ledger.put(program_data, BPF_UPGRADEABLE_LOADER_ID, 1, program_data_bytes(authority));
    ledger.put(program_id, BPF_UPGRADEABLE_LOADER_ID, 1, program_bytes(&program_data));
    program_id
}

/// A small DAO with one of every asset kind
pub struct Dao {
    pub ledger: std::sync::Arc<MockLedger>,
    pub realm: Realm,
    pub lists: gov_assets::config::StaticLists,
    pub treasury_gov: Governance,
    pub program_gov: Governance,
    pub treasury: Pubkey,
    pub usdc: Pubkey,
    pub token_accounts: [Pubkey; 2],
    pub empty_token_account: Pubkey,
    pub auxiliary_owner: Pubkey,
    pub auxiliary_account: Pubkey,
    pub stake_account: Pubkey,
    pub program_id: Pubkey,
}

impl Dao {
    pub fn new() -> Self {
        let ledger = std::sync::Arc::new(MockLedger::new());
        let community_mint = Pubkey::new_unique();
        let realm = realm("Test", community_mint);

        let treasury_gov =
            governance(&realm, GovernanceAccountType::GovernanceV2, Pubkey::new_unique());
        let treasury = fund_treasury(&ledger, &treasury_gov, 2_000_000);

        // supply 1 but governed: still a mint asset
        ledger.put(community_mint, TOKEN_PROGRAM_ID, 1, mint_bytes(Some(&treasury), 1, 0));

        let usdc = Pubkey::new_unique();
        ledger.put(usdc, TOKEN_PROGRAM_ID, 1, mint_bytes(None, 1_000_000_000_000, 6));
        let token_accounts = [Pubkey::new_unique(), Pubkey::new_unique()];
        for (address, amount) in token_accounts.iter().zip([5_000_000, 7]) {
            let data = token_account_bytes(&usdc, &treasury, amount);
            ledger.put(*address, TOKEN_PROGRAM_ID, 1, data);
        }
        let empty_token_account = Pubkey::new_unique();
        let empty = token_account_bytes(&usdc, &treasury, 0);
        ledger.put(empty_token_account, TOKEN_PROGRAM_ID, 1, empty);

        let stake_account = add_stake(
            &ledger,
            gov_assets::consts::STAKE_DELEGATED_DISCRIMINANT,
            &treasury,
            5_000_000_000,
        );

        let program_id = Pubkey::new_unique();
        let program_gov =
            governance(&realm, GovernanceAccountType::ProgramGovernanceV2, program_id);
        let program_data = Pubkey::new_unique();
        let upgradeable = program_data_bytes(&program_gov.address);
        ledger.put(program_data, BPF_UPGRADEABLE_LOADER_ID, 1, upgradeable);
        ledger.put(program_id, BPF_UPGRADEABLE_LOADER_ID, 1, program_bytes(&program_data));

        let auxiliary_owner = Pubkey::new_unique();
        let auxiliary_account = Pubkey::new_unique();
        ledger.put(
            auxiliary_account,
            TOKEN_PROGRAM_ID,
            1,
            token_account_bytes(&usdc, &auxiliary_owner, 3_000_000),
        );
        // same owner, not allow-listed
        ledger.put(
            Pubkey::new_unique(),
            TOKEN_PROGRAM_ID,
            1,
            token_account_bytes(&usdc, &auxiliary_owner, 1),
        );

        let mut lists = gov_assets::config::StaticLists::empty();
        lists.auxiliary_token_accounts.insert(
            "Test".to_string(),
            vec![gov_assets::config::AuxiliaryEntry {
                owner: auxiliary_owner.to_string(),
                accounts: vec![auxiliary_account.to_string()],
            }],
        );

        Self {
            ledger,
            realm,
            lists,
            treasury_gov,
            program_gov,
            treasury,
            usdc,
            token_accounts,
            empty_token_account,
            auxiliary_owner,
            auxiliary_account,
            stake_account,
            program_id,
        }
    }

    pub fn governances(&self) -> Vec<Governance> {
        vec![self.treasury_gov.clone(), self.program_gov.clone()]
    }

    pub fn config(&self) -> gov_assets::config::EngineConfig {
        gov_assets::config::EngineConfig {
            lists: self.lists.clone(),
            ..Default::default()
        }
    }

    pub fn aggregator(&self) -> gov_assets::AssetAggregator<std::sync::Arc<MockLedger>> {
        self.aggregator_with_prices(std::sync::Arc::new(gov_assets::price::PriceTable::new()))
    }

    pub fn aggregator_with_prices(
        &self,
        prices: std::sync::Arc<gov_assets::price::PriceTable>,
    ) -> gov_assets::AssetAggregator<std::sync::Arc<MockLedger>> {
        gov_assets::AssetAggregator::new(self.ledger.clone(), &self.config(), prices)
    }
}
