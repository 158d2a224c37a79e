//! Classified asset accounts.

use serde::Serialize;
use solana_program::pubkey::Pubkey;

use crate::{
    consts::{SOL_DECIMALS, WSOL_MINT},
    layout::{MintInfo, StakeInfo, StakeState, TokenInfo},
    price::{ui_amount, usd_value, PriceOracle},
    state::{GovernanceAccountType, GovernanceWithTreasury},
};
use num_bigint::BigUint;

/// Back-reference to the governance controlling an asset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernanceRef {
    pub address: Pubkey,
    pub native_treasury: Pubkey,
    pub governed_account: Pubkey,
    pub account_type: GovernanceAccountType,
}

impl From<&GovernanceWithTreasury> for GovernanceRef {
    fn from(g: &GovernanceWithTreasury) -> Self {
        Self {
            address: g.governance.address,
            native_treasury: g.native_treasury,
            governed_account: g.governance.governed_account,
            account_type: g.governance.account_type,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Token,
    Nft,
    Sol,
    Mint,
    Program,
    Stake,
    AuxiliaryToken,
    Generic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Token {
        token: TokenInfo,
        mint: MintInfo,
    },
    Nft {
        token: TokenInfo,
        mint: MintInfo,
    },
    /// Native treasury wallet; `lamports` already excludes the rent reserve
    Sol {
        lamports: u64,
        wsol_mint: Option<MintInfo>,
    },
    Mint {
        mint: MintInfo,
    },
    Program {
        program_id: Pubkey,
        upgrade_authority: Pubkey,
    },
    Stake {
        stake: StakeInfo,
        lamports: u64,
    },
    AuxiliaryToken {
        token: TokenInfo,
        mint: MintInfo,
    },
    Generic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetAccount {
    /// Unique within an inventory
    pub address: Pubkey,
    /// None only for allow-listed auxiliary accounts
    pub governance: Option<GovernanceRef>,
    pub kind: AssetKind,
}

impl AssetAccount {
    pub fn account_type(&self) -> AccountType {
        match &self.kind {
            AssetKind::Token { .. } => AccountType::Token,
            AssetKind::Nft { .. } => AccountType::Nft,
            AssetKind::Sol { .. } => AccountType::Sol,
            AssetKind::Mint { .. } => AccountType::Mint,
            AssetKind::Program { .. } => AccountType::Program,
            AssetKind::Stake { .. } => AccountType::Stake,
            AssetKind::AuxiliaryToken { .. } => AccountType::AuxiliaryToken,
            AssetKind::Generic => AccountType::Generic,
        }
    }

    pub fn is_sol(&self) -> bool {
        matches!(self.kind, AssetKind::Sol { .. })
    }

    /// Token, NFT and SOL accounts make up the governed token view
    pub fn is_governed_token(&self) -> bool {
        matches!(
            self.kind,
            AssetKind::Token { .. } | AssetKind::Nft { .. } | AssetKind::Sol { .. }
        )
    }

    pub fn governance_address(&self) -> Option<Pubkey> {
        self.governance.as_ref().map(|g| g.address)
    }

    pub fn is_owned_by(&self, governance: &Pubkey) -> bool {
        self.governance_address().as_ref() == Some(governance)
    }

    /// Address funds are sent to when moving this asset
    pub fn transfer_address(&self) -> Pubkey {
        match &self.kind {
            AssetKind::Sol { .. } => self
                .governance
                .as_ref()
                .map(|g| g.native_treasury)
                .unwrap_or(self.address),
            _ => self.address,
        }
    }

    pub fn mint(&self) -> Option<&MintInfo> {
        match &self.kind {
            AssetKind::Token { mint, .. }
            | AssetKind::Nft { mint, .. }
            | AssetKind::AuxiliaryToken { mint, .. }
            | AssetKind::Mint { mint } => Some(mint),
            AssetKind::Sol { wsol_mint, .. } => wsol_mint.as_ref(),
            AssetKind::Program { .. } | AssetKind::Stake { .. } | AssetKind::Generic => None,
        }
    }

    pub fn token(&self) -> Option<&TokenInfo> {
        match &self.kind {
            AssetKind::Token { token, .. }
            | AssetKind::Nft { token, .. }
            | AssetKind::AuxiliaryToken { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Raw balance and decimals, for the kinds that hold value
    pub fn balance(&self) -> Option<(BigUint, u8)> {
        match &self.kind {
            AssetKind::Token { token, mint }
            | AssetKind::Nft { token, mint }
            | AssetKind::AuxiliaryToken { token, mint } => {
                Some((token.amount.clone(), mint.decimals))
            }
            AssetKind::Sol { lamports, .. } | AssetKind::Stake { lamports, .. } => {
                Some((BigUint::from(*lamports), SOL_DECIMALS))
            }
            AssetKind::Mint { .. } | AssetKind::Program { .. } | AssetKind::Generic => None,
        }
    }

    /// Mint priced for this asset's balance
    pub fn price_mint(&self) -> Option<Pubkey> {
        match &self.kind {
            AssetKind::Token { mint, .. }
            | AssetKind::Nft { mint, .. }
            | AssetKind::AuxiliaryToken { mint, .. } => Some(mint.address),
            AssetKind::Sol { .. } | AssetKind::Stake { .. } => Some(WSOL_MINT),
            AssetKind::Mint { .. } | AssetKind::Program { .. } | AssetKind::Generic => None,
        }
    }

    pub fn usd_value(&self, oracle: &dyn PriceOracle) -> Option<f64> {
        let (amount, decimals) = self.balance()?;
        let price = oracle.usd_price(&self.price_mint()?)?;
        usd_value(&amount, decimals, price)
    }

    pub fn to_view(&self, oracle: Option<&dyn PriceOracle>) -> AssetView {
        let balance = self.balance();
        let (stake_state, validator) = match &self.kind {
            AssetKind::Stake { stake, .. } => {
                (Some(stake.state), stake.validator.map(|v| v.to_string()))
            }
            _ => (None, None),
        };
        AssetView {
            address: self.address.to_string(),
            account_type: self.account_type(),
            governance: self.governance.as_ref().map(|g| g.address.to_string()),
            native_treasury: self.governance.as_ref().map(|g| g.native_treasury.to_string()),
            mint: self.mint().map(|m| m.address.to_string()),
            amount: balance.as_ref().map(|(a, _)| a.to_string()),
            ui_amount: balance
                .as_ref()
                .and_then(|(a, d)| ui_amount(a, *d))
                .map(|d| d.normalize().to_string()),
            usd_value: oracle.and_then(|o| self.usd_value(o)),
            stake_state,
            validator,
        }
    }
}

/// Flat, serializable rendering of an asset
#[derive(Debug, Clone, Serialize)]
pub struct AssetView {
    pub address: String,
    pub account_type: AccountType,
    pub governance: Option<String>,
    pub native_treasury: Option<String>,
    pub mint: Option<String>,
    pub amount: Option<String>,
    pub ui_amount: Option<String>,
    pub usd_value: Option<f64>,
    pub stake_state: Option<StakeState>,
    pub validator: Option<String>,
}

/// First occurrence of each address wins
pub fn dedup_by_address(accounts: Vec<AssetAccount>) -> Vec<AssetAccount> {
    let mut seen = std::collections::HashSet::new();
    accounts.into_iter().filter(|a| seen.insert(a.address)).collect()
}

pub fn total_usd_value(accounts: &[AssetAccount], oracle: &dyn PriceOracle) -> f64 {
    accounts.iter().filter_map(|a| a.usd_value(oracle)).sum()
}
