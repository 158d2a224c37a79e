use borsh::{BorshDeserialize, BorshSerialize};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use solana_program::pubkey::Pubkey;

use crate::{consts::NATIVE_TREASURY_SEED, error::AssetError};

/// spl-governance account type tags (first byte of every account).
/// Only the realm and governance tags are listed.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
pub enum GovernanceAccountType {
    RealmV1 = 1,
    GovernanceV1 = 3,
    ProgramGovernanceV1 = 4,
    MintGovernanceV1 = 9,
    TokenGovernanceV1 = 10,
    RealmV2 = 16,
    GovernanceV2 = 18,
    ProgramGovernanceV2 = 19,
    MintGovernanceV2 = 20,
    TokenGovernanceV2 = 21,
}

impl GovernanceAccountType {
    pub fn is_governance(&self) -> bool {
        !matches!(self, Self::RealmV1 | Self::RealmV2)
    }

    pub fn is_program_governance(&self) -> bool {
        matches!(self, Self::ProgramGovernanceV1 | Self::ProgramGovernanceV2)
    }
}

/// A DAO realm. The name keys the per-DAO static tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Realm {
    pub address: Pubkey,
    /// Governance program instance owning the realm
    pub program_id: Pubkey,
    pub name: String,
    pub community_mint: Pubkey,
    pub council_mint: Option<Pubkey>,
}

/// On-chain governance record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Governance {
    pub address: Pubkey,
    pub program_id: Pubkey,
    pub realm: Pubkey,
    pub governed_account: Pubkey,
    pub account_type: GovernanceAccountType,
}

/// Governance with its derived native treasury attached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernanceWithTreasury {
    pub governance: Governance,
    pub native_treasury: Pubkey,
}

impl GovernanceWithTreasury {
    pub fn address(&self) -> Pubkey {
        self.governance.address
    }

    /// True when `key` is the governance itself or its treasury
    pub fn controls(&self, key: &Pubkey) -> bool {
        self.governance.address == *key || self.native_treasury == *key
    }
}

/// Derives the native treasury PDA for a governance
/// Seeds: ["native-treasury", governance]
pub fn native_treasury_pda(governance: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[NATIVE_TREASURY_SEED, governance.as_ref()], program_id)
}

pub fn derive_native_treasury(governance: &Pubkey, program_id: &Pubkey) -> Pubkey {
    native_treasury_pda(governance, program_id).0
}

/// String flavour of [`derive_native_treasury`] for untrusted input
pub fn derive_native_treasury_str(
    governance: &str,
    program_id: &str,
) -> Result<Pubkey, AssetError> {
    let governance = parse_pubkey(governance)?;
    let program_id = parse_pubkey(program_id)?;
    Ok(derive_native_treasury(&governance, &program_id))
}

pub fn with_native_treasuries(governances: &[Governance]) -> Vec<GovernanceWithTreasury> {
    governances
        .iter()
        .map(|g| GovernanceWithTreasury {
            native_treasury: derive_native_treasury(&g.address, &g.program_id),
            governance: g.clone(),
        })
        .collect()
}

pub fn parse_pubkey(s: &str) -> Result<Pubkey, AssetError> {
    s.trim()
        .parse::<Pubkey>()
        .map_err(|_| AssetError::InvalidAddress(s.to_string()))
}

// ============================================================================
// Account decoding
// ============================================================================

/// Leading fields shared by every governance version
#[derive(BorshSerialize, BorshDeserialize)]
struct GovernanceHeader {
    account_type: u8,
    realm: Pubkey,
    governed_account: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize)]
enum MintMaxVoterWeightSource {
    SupplyFraction(u64),
    Absolute(u64),
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RealmConfig {
    _legacy1: u8,
    _legacy2: u8,
    _reserved: [u8; 6],
    _min_community_weight_to_create_governance: u64,
    _community_mint_max_voter_weight_source: MintMaxVoterWeightSource,
    council_mint: Option<Pubkey>,
}

/// Realm V1/V2 up to and including the name
#[derive(BorshSerialize, BorshDeserialize)]
struct RealmHeader {
    account_type: u8,
    community_mint: Pubkey,
    config: RealmConfig,
    _reserved: [u8; 6],
    _legacy1: u16,
    _authority: Option<Pubkey>,
    name: String,
}

/// Decode a Governance (any version) account. Trailing config bytes are ignored.
pub fn decode_governance(
    address: Pubkey,
    program_id: Pubkey,
    data: &[u8],
) -> Result<Governance, AssetError> {
    let err = |reason: String| AssetError::Decode {
        kind: "governance",
        address,
        reason,
    };
    let header = GovernanceHeader::deserialize(&mut &data[..]).map_err(|e| err(e.to_string()))?;
    let account_type = GovernanceAccountType::try_from(header.account_type)
        .map_err(|_| err(format!("unknown account type {}", header.account_type)))?;
    if !account_type.is_governance() {
        return Err(err("not a governance account".to_string()));
    }

    Ok(Governance {
        address,
        program_id,
        realm: header.realm,
        governed_account: header.governed_account,
        account_type,
    })
}

/// Decode a Realm (V1 or V2) account.
pub fn decode_realm(address: Pubkey, program_id: Pubkey, data: &[u8]) -> Result<Realm, AssetError> {
    let err = |reason: String| AssetError::Decode {
        kind: "realm",
        address,
        reason,
    };
    let header = RealmHeader::deserialize(&mut &data[..]).map_err(|e| err(e.to_string()))?;
    match GovernanceAccountType::try_from(header.account_type) {
        Ok(GovernanceAccountType::RealmV1 | GovernanceAccountType::RealmV2) => {}
        _ => return Err(err("not a realm account".to_string())),
    }

    Ok(Realm {
        address,
        program_id,
        name: header.name,
        community_mint: header.community_mint,
        council_mint: header.config.council_mint,
    })
}
