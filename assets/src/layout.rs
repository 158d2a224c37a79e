//! Byte layouts of the accounts the engine understands.
//!
//! Token accounts and mints of both token programs normalize into
//! [`TokenInfo`] / [`MintInfo`]. The legacy base layouts are unpacked with
//! spl-token; token-2022 shares them and appends an account-type byte plus
//! TLV extensions, which are walked here.

use num_bigint::BigUint;
use serde_json::Value;
use solana_program::pubkey::Pubkey;
use spl_token::{
    solana_program::{program_option::COption, program_pack::Pack, pubkey::Pubkey as SplPubkey},
    state::{Account as SplAccount, AccountState, Mint as SplMint},
};

use crate::consts::{
    LOADER_PROGRAM_DATA_DISCRIMINANT, LOADER_PROGRAM_DISCRIMINANT, STAKE_DELEGATED_DISCRIMINANT,
    STAKE_INITIALIZED_DISCRIMINANT, STAKE_VALIDATOR_OFFSET, TOKEN_2022_PROGRAM_ID,
    TOKEN_PROGRAM_ID,
};

pub const TOKEN_ACCOUNT_LEN: usize = SplAccount::LEN; // 165
pub const MINT_LEN: usize = SplMint::LEN; // 82

/// Token-2022 account type bytes, stored right after the base account layout
/// (mints are padded up to it)
pub(crate) const ACCOUNT_TYPE_MINT: u8 = 1;
const ACCOUNT_TYPE_ACCOUNT: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenProgram {
    Legacy,
    Token2022,
}

impl TokenProgram {
    pub fn from_owner(owner: &Pubkey) -> Option<Self> {
        if *owner == TOKEN_PROGRAM_ID {
            Some(TokenProgram::Legacy)
        } else if *owner == TOKEN_2022_PROGRAM_ID {
            Some(TokenProgram::Token2022)
        } else {
            None
        }
    }

    pub fn program_id(&self) -> Pubkey {
        match self {
            TokenProgram::Legacy => TOKEN_PROGRAM_ID,
            TokenProgram::Token2022 => TOKEN_2022_PROGRAM_ID,
        }
    }
}

/// Token account normalized across both token programs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: BigUint,
    pub delegate: Option<Pubkey>,
    pub delegated_amount: BigUint,
    pub is_frozen: bool,
    pub is_native: bool,
    pub close_authority: Option<Pubkey>,
    pub program: TokenProgram,
    /// Token-2022 extension names, camelCase as the RPC reports them
    pub extensions: Vec<String>,
}

impl TokenInfo {
    pub fn is_token_2022(&self) -> bool {
        self.program == TokenProgram::Token2022
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintInfo {
    pub address: Pubkey,
    pub mint_authority: Option<Pubkey>,
    pub supply: BigUint,
    pub decimals: u8,
    pub is_initialized: bool,
    pub freeze_authority: Option<Pubkey>,
    pub program: TokenProgram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum StakeState {
    Inactive,
    Active,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeInfo {
    pub state: StakeState,
    pub validator: Option<Pubkey>,
}

fn key(k: &SplPubkey) -> Pubkey {
    Pubkey::new_from_array(k.to_bytes())
}

fn coption_key(k: &COption<SplPubkey>) -> Option<Pubkey> {
    match k {
        COption::Some(k) => Some(key(k)),
        COption::None => None,
    }
}

/// Parse token account bytes of either program. `program` comes from the
/// account's owner.
pub fn parse_token_account(
    address: Pubkey,
    data: &[u8],
    program: TokenProgram,
) -> Result<TokenInfo, String> {
    if data.len() < TOKEN_ACCOUNT_LEN {
        return Err(format!("expected at least {} bytes, got {}", TOKEN_ACCOUNT_LEN, data.len()));
    }
    if program == TokenProgram::Legacy && data.len() != TOKEN_ACCOUNT_LEN {
        return Err(format!("legacy token account must be {} bytes", TOKEN_ACCOUNT_LEN));
    }
    let base = SplAccount::unpack(&data[..TOKEN_ACCOUNT_LEN]).map_err(|e| e.to_string())?;

    let extensions = match program {
        TokenProgram::Legacy => Vec::new(),
        TokenProgram::Token2022 => {
            parse_extensions(&data[TOKEN_ACCOUNT_LEN..], ACCOUNT_TYPE_ACCOUNT)?
        }
    };

    Ok(TokenInfo {
        address,
        mint: key(&base.mint),
        owner: key(&base.owner),
        amount: BigUint::from(base.amount),
        delegate: coption_key(&base.delegate),
        delegated_amount: BigUint::from(base.delegated_amount),
        is_frozen: base.state == AccountState::Frozen,
        is_native: base.is_native.is_some(),
        close_authority: coption_key(&base.close_authority),
        program,
        extensions,
    })
}

/// Normalize a `jsonParsed` token account (`data.parsed.info`) into [`TokenInfo`].
pub fn parse_token_account_json(
    address: Pubkey,
    parsed: &Value,
    program: TokenProgram,
) -> Result<TokenInfo, String> {
    let info = parsed
        .pointer("/parsed/info")
        .ok_or_else(|| "missing parsed.info".to_string())?;

    let pubkey_field = |name: &str| -> Result<Option<Pubkey>, String> {
        match info.get(name).and_then(Value::as_str) {
            Some(s) => s.parse().map(Some).map_err(|_| format!("bad {}: {}", name, s)),
            None => Ok(None),
        }
    };
    let amount_field = |pointer: &str| -> Result<BigUint, String> {
        match info.pointer(pointer).and_then(Value::as_str) {
            Some(s) => s.parse().map_err(|_| format!("bad amount {}", s)),
            None => Ok(BigUint::default()),
        }
    };

    let mint = pubkey_field("mint")?.ok_or_else(|| "missing mint".to_string())?;
    let owner = pubkey_field("owner")?.ok_or_else(|| "missing owner".to_string())?;
    let extensions = info
        .get("extensions")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|e| e.get("extension").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(TokenInfo {
        address,
        mint,
        owner,
        amount: amount_field("/tokenAmount/amount")?,
        delegate: pubkey_field("delegate")?,
        delegated_amount: amount_field("/delegatedAmount/amount")?,
        is_frozen: info.get("state").and_then(Value::as_str) == Some("frozen"),
        is_native: info.get("isNative").and_then(Value::as_bool).unwrap_or(false),
        close_authority: pubkey_field("closeAuthority")?,
        program,
        extensions,
    })
}

pub fn parse_mint(address: Pubkey, data: &[u8], program: TokenProgram) -> Result<MintInfo, String> {
    if data.len() < MINT_LEN {
        return Err(format!("expected at least {} bytes, got {}", MINT_LEN, data.len()));
    }
    let base = SplMint::unpack_unchecked(&data[..MINT_LEN]).map_err(|e| e.to_string())?;
    Ok(MintInfo {
        address,
        mint_authority: coption_key(&base.mint_authority),
        supply: BigUint::from(base.supply),
        decimals: base.decimals,
        is_initialized: base.is_initialized,
        freeze_authority: coption_key(&base.freeze_authority),
        program,
    })
}

/// Walk token-2022 TLV entries after the base layout.
/// `tail` starts at byte 165: account type byte, then (u16 type, u16 len, value)*.
fn parse_extensions(tail: &[u8], expected_type: u8) -> Result<Vec<String>, String> {
    let Some((&account_type, mut tlv)) = tail.split_first() else {
        return Ok(Vec::new());
    };
    if account_type != expected_type && account_type != 0 {
        return Err(format!("unexpected token-2022 account type {}", account_type));
    }

    let mut names = Vec::new();
    while tlv.len() >= 4 {
        let ext_type = u16::from_le_bytes([tlv[0], tlv[1]]);
        let len = u16::from_le_bytes([tlv[2], tlv[3]]) as usize;
        if ext_type == 0 {
            break;
        }
        if tlv.len() < 4 + len {
            return Err(format!("truncated extension {}", ext_type));
        }
        names.push(extension_name(ext_type));
        tlv = &tlv[4 + len..];
    }
    Ok(names)
}

fn extension_name(ext_type: u16) -> String {
    let name = match ext_type {
        1 => "transferFeeConfig",
        2 => "transferFeeAmount",
        3 => "mintCloseAuthority",
        4 => "confidentialTransferMint",
        5 => "confidentialTransferAccount",
        6 => "defaultAccountState",
        7 => "immutableOwner",
        8 => "memoTransfer",
        9 => "nonTransferable",
        10 => "interestBearingConfig",
        11 => "cpiGuard",
        12 => "permanentDelegate",
        13 => "nonTransferableAccount",
        14 => "transferHook",
        15 => "transferHookAccount",
        16 => "confidentialTransferFeeConfig",
        17 => "confidentialTransferFeeAmount",
        18 => "metadataPointer",
        19 => "tokenMetadata",
        20 => "groupPointer",
        21 => "tokenGroup",
        22 => "groupMemberPointer",
        23 => "tokenGroupMember",
        other => return format!("unknown({})", other),
    };
    name.to_string()
}

/// Stake account state from the 4-byte discriminant, validator from the
/// delegation when active.
pub fn parse_stake(data: &[u8]) -> Result<StakeInfo, String> {
    let tag = data.get(0..4).ok_or_else(|| "stake account too short".to_string())?;
    if tag == STAKE_INITIALIZED_DISCRIMINANT {
        Ok(StakeInfo {
            state: StakeState::Inactive,
            validator: None,
        })
    } else if tag == STAKE_DELEGATED_DISCRIMINANT {
        let validator = data
            .get(STAKE_VALIDATOR_OFFSET..STAKE_VALIDATOR_OFFSET + 32)
            .and_then(|b| Pubkey::try_from(b).ok())
            .ok_or_else(|| "stake delegation truncated".to_string())?;
        Ok(StakeInfo {
            state: StakeState::Active,
            validator: Some(validator),
        })
    } else {
        Err(format!("unsupported stake state {:?}", tag))
    }
}

/// Upgradeable loader `Program` account: returns its program-data address.
pub fn parse_loader_program(data: &[u8]) -> Option<Pubkey> {
    if data.get(0..4)? != LOADER_PROGRAM_DISCRIMINANT {
        return None;
    }
    Pubkey::try_from(data.get(4..36)?).ok()
}

/// Upgradeable loader `ProgramData` account: returns the upgrade authority
/// (None when the program is immutable).
pub fn parse_loader_program_data(data: &[u8]) -> Option<Option<Pubkey>> {
    if data.get(0..4)? != LOADER_PROGRAM_DATA_DISCRIMINANT {
        return None;
    }
    match *data.get(12)? {
        0 => Some(None),
        1 => Pubkey::try_from(data.get(13..45)?).ok().map(Some),
        _ => None,
    }
}
