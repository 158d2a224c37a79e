//! Raw accounts to typed [`AssetAccount`]s.
//!
//! Ownership is resolved against a [`ClassifyContext`] built once per
//! aggregation pass: governance addresses, their native treasuries, the
//! auxiliary allow-list and every mint loaded so far.

use std::collections::{HashMap, HashSet};

use num_bigint::BigUint;
use solana_program::pubkey::Pubkey;

use crate::{
    assets::{AssetAccount, AssetKind, GovernanceRef},
    consts::{
        BPF_UPGRADEABLE_LOADER_ID, DEFAULT_NATIVE_SOL_MINT, DEFAULT_NFT_TREASURY_MINT,
        RENT_EXEMPT_MINIMUM_LAMPORTS, STAKE_AUTHORIZED_OFFSET, STAKE_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    },
    error::AssetError,
    layout::{
        parse_loader_program, parse_mint, parse_stake, parse_token_account,
        parse_token_account_json, MintInfo, TokenInfo, TokenProgram, ACCOUNT_TYPE_MINT, MINT_LEN,
        TOKEN_ACCOUNT_LEN,
    },
    rpc::RawAccount,
    state::GovernanceWithTreasury,
};

// ==================== Context ====================

/// Lookup tables for one aggregation pass
#[derive(Debug, Default, Clone)]
pub struct ClassifyContext {
    governances: Vec<GovernanceWithTreasury>,
    by_governance: HashMap<Pubkey, usize>,
    by_treasury: HashMap<Pubkey, usize>,
    by_governed: HashMap<Pubkey, usize>,
    auxiliary: HashSet<(Pubkey, Pubkey)>,
    mints: HashMap<Pubkey, MintInfo>,
    wsol_mint: Option<MintInfo>,
    program_data_authorities: HashMap<Pubkey, Pubkey>,
}

impl ClassifyContext {
    pub fn new(governances: &[GovernanceWithTreasury], auxiliary: &[(Pubkey, Pubkey)]) -> Self {
        let mut ctx = Self {
            governances: governances.to_vec(),
            auxiliary: auxiliary.iter().copied().collect(),
            ..Self::default()
        };
        for (i, g) in governances.iter().enumerate() {
            ctx.by_governance.entry(g.governance.address).or_insert(i);
            ctx.by_treasury.entry(g.native_treasury).or_insert(i);
            ctx.by_governed.entry(g.governance.governed_account).or_insert(i);
        }
        ctx
    }

    pub fn governances(&self) -> &[GovernanceWithTreasury] {
        &self.governances
    }

    pub fn add_mints(&mut self, mints: impl IntoIterator<Item = MintInfo>) {
        for mint in mints {
            self.mints.insert(mint.address, mint);
        }
    }

    pub fn mint(&self, address: &Pubkey) -> Option<&MintInfo> {
        self.mints.get(address)
    }

    pub fn set_wsol_mint(&mut self, mint: Option<MintInfo>) {
        self.wsol_mint = mint;
    }

    /// Record a program-data account's upgrade authority
    pub fn add_program_data_authority(&mut self, program_data: Pubkey, authority: Pubkey) {
        self.program_data_authorities.insert(program_data, authority);
    }

    pub fn program_data_authority(&self, program_data: &Pubkey) -> Option<Pubkey> {
        self.program_data_authorities.get(program_data).copied()
    }

    /// Token owner lookup: governance address first, then treasury
    pub fn owner_governance(&self, key: &Pubkey) -> Option<&GovernanceWithTreasury> {
        self.by_governance
            .get(key)
            .or_else(|| self.by_treasury.get(key))
            .map(|&i| &self.governances[i])
    }

    /// Authority lookup: treasury first, then governance address
    pub fn authority_governance(&self, key: &Pubkey) -> Option<&GovernanceWithTreasury> {
        self.by_treasury
            .get(key)
            .or_else(|| self.by_governance.get(key))
            .map(|&i| &self.governances[i])
    }

    pub fn treasury_governance(&self, treasury: &Pubkey) -> Option<&GovernanceWithTreasury> {
        self.by_treasury.get(treasury).map(|&i| &self.governances[i])
    }

    pub fn governed_by(&self, governed_account: &Pubkey) -> Option<&GovernanceWithTreasury> {
        self.by_governed.get(governed_account).map(|&i| &self.governances[i])
    }

    pub fn is_auxiliary(&self, owner: &Pubkey, account: &Pubkey) -> bool {
        self.auxiliary.contains(&(*owner, *account))
    }
}

// ==================== Classifier ====================

/// Classification rules. The sentinel mints are fields so tests and other
/// clusters can swap them.
#[derive(Debug, Clone)]
pub struct Classifier {
    pub nft_mint: Pubkey,
    pub native_sol_mint: Pubkey,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            nft_mint: DEFAULT_NFT_TREASURY_MINT,
            native_sol_mint: DEFAULT_NATIVE_SOL_MINT,
        }
    }
}

impl Classifier {
    /// Route a fetched account by its owning program. `Ok(None)` means the
    /// account is not an asset of this DAO.
    pub fn classify(
        &self,
        address: Pubkey,
        raw: &RawAccount,
        ctx: &ClassifyContext,
    ) -> Result<Option<AssetAccount>, AssetError> {
        if let Some(program) = TokenProgram::from_owner(&raw.owner) {
            if is_mint_layout(raw) {
                let mint =
                    parse_mint(address, &raw.data, program).map_err(|reason| AssetError::Decode {
                        kind: "mint",
                        address,
                        reason,
                    })?;
                return Ok(self.mint(mint, ctx));
            }
            let token = decode_token_account(address, raw, program)?;
            return self.token_account(token, ctx);
        }

        if raw.owner == STAKE_PROGRAM_ID {
            return self.stake(address, raw, ctx);
        }

        if raw.owner == BPF_UPGRADEABLE_LOADER_ID {
            // program-data accounts only carry the authority; the program account is the asset
            let Some(program_data) = parse_loader_program(&raw.data) else {
                return Ok(None);
            };
            return Ok(ctx
                .program_data_authority(&program_data)
                .and_then(|authority| self.program(address, authority, ctx)));
        }

        if raw.owner == SYSTEM_PROGRAM_ID {
            if let Some(g) = ctx.treasury_governance(&address) {
                return Ok(Some(self.sol(g, raw.lamports, ctx)));
            }
        }

        Ok(ctx.governed_by(&address).map(|g| self.generic(g)))
    }

    /// Governance-owned token accounts first, then the auxiliary allow-list
    pub fn token_account(
        &self,
        token: TokenInfo,
        ctx: &ClassifyContext,
    ) -> Result<Option<AssetAccount>, AssetError> {
        let missing_mint = || AssetError::MissingMintInfo {
            account: token.address,
            mint: token.mint,
        };

        if let Some(g) = ctx.owner_governance(&token.owner) {
            let mint = ctx.mint(&token.mint).cloned().ok_or_else(missing_mint)?;
            let governance = Some(GovernanceRef::from(g));
            let address = token.address;

            if token.mint == self.nft_mint && !token.is_token_2022() {
                return Ok(Some(AssetAccount {
                    address,
                    governance,
                    kind: AssetKind::Nft { token, mint },
                }));
            }
            if mint.supply != BigUint::from(1u32) && mint.address != self.native_sol_mint {
                return Ok(Some(AssetAccount {
                    address,
                    governance,
                    kind: AssetKind::Token { token, mint },
                }));
            }
            return Ok(None);
        }

        if ctx.is_auxiliary(&token.owner, &token.address) {
            if token.is_token_2022() {
                return Ok(None);
            }
            let mint = ctx.mint(&token.mint).cloned().ok_or_else(missing_mint)?;
            return Ok(Some(AssetAccount {
                address: token.address,
                governance: None,
                kind: AssetKind::AuxiliaryToken { token, mint },
            }));
        }

        Ok(None)
    }

    /// Treasury wallet with the rent-exempt reserve taken off
    pub fn sol(
        &self,
        governance: &GovernanceWithTreasury,
        lamports: u64,
        ctx: &ClassifyContext,
    ) -> AssetAccount {
        AssetAccount {
            address: governance.native_treasury,
            governance: Some(GovernanceRef::from(governance)),
            kind: AssetKind::Sol {
                lamports: lamports.saturating_sub(RENT_EXEMPT_MINIMUM_LAMPORTS),
                wsol_mint: ctx.wsol_mint.clone(),
            },
        }
    }

    /// Mints count when their authority resolves. Supply is irrelevant here.
    pub fn mint(&self, mint: MintInfo, ctx: &ClassifyContext) -> Option<AssetAccount> {
        let authority = mint.mint_authority?;
        let g = ctx.authority_governance(&authority)?;
        Some(AssetAccount {
            address: mint.address,
            governance: Some(GovernanceRef::from(g)),
            kind: AssetKind::Mint { mint },
        })
    }

    /// Upgrade authority must be a treasury or a program governance
    pub fn program(
        &self,
        program_id: Pubkey,
        authority: Pubkey,
        ctx: &ClassifyContext,
    ) -> Option<AssetAccount> {
        let g = match ctx.treasury_governance(&authority) {
            Some(g) => g,
            None => ctx
                .owner_governance(&authority)
                .filter(|g| g.governance.account_type.is_program_governance())?,
        };
        Some(AssetAccount {
            address: program_id,
            governance: Some(GovernanceRef::from(g)),
            kind: AssetKind::Program {
                program_id,
                upgrade_authority: authority,
            },
        })
    }

    pub fn stake(
        &self,
        address: Pubkey,
        raw: &RawAccount,
        ctx: &ClassifyContext,
    ) -> Result<Option<AssetAccount>, AssetError> {
        let decode_err = |reason: String| AssetError::Decode {
            kind: "stake",
            address,
            reason,
        };
        let stake = parse_stake(&raw.data).map_err(decode_err)?;
        let withdrawer = raw
            .data
            .get(STAKE_AUTHORIZED_OFFSET..STAKE_AUTHORIZED_OFFSET + 32)
            .and_then(|b| Pubkey::try_from(b).ok())
            .ok_or_else(|| decode_err("missing authorized withdrawer".to_string()))?;

        Ok(ctx.authority_governance(&withdrawer).map(|g| AssetAccount {
            address,
            governance: Some(GovernanceRef::from(g)),
            kind: AssetKind::Stake {
                stake,
                lamports: raw.lamports,
            },
        }))
    }

    /// Placeholder for a governed account nothing else produced
    pub fn generic(&self, governance: &GovernanceWithTreasury) -> AssetAccount {
        AssetAccount {
            address: governance.governance.governed_account,
            governance: Some(GovernanceRef::from(governance)),
            kind: AssetKind::Generic,
        }
    }
}

fn is_mint_layout(raw: &RawAccount) -> bool {
    if let Some(parsed) = &raw.parsed {
        return parsed.pointer("/parsed/type").and_then(|t| t.as_str()) == Some("mint");
    }
    raw.data.len() == MINT_LEN
        || (raw.data.len() > TOKEN_ACCOUNT_LEN && raw.data[TOKEN_ACCOUNT_LEN] == ACCOUNT_TYPE_MINT)
}

/// Token account from base64 bytes or a `jsonParsed` payload
pub fn decode_token_account(
    address: Pubkey,
    raw: &RawAccount,
    program: TokenProgram,
) -> Result<TokenInfo, AssetError> {
    let parsed = match &raw.parsed {
        Some(parsed) => parse_token_account_json(address, parsed, program),
        None => parse_token_account(address, &raw.data, program),
    };
    parsed.map_err(|reason| AssetError::Decode {
        kind: "token account",
        address,
        reason,
    })
}
