use solana_program::{pubkey, pubkey::Pubkey};

/// Default spl-governance program instance
pub const DEFAULT_GOVERNANCE_PROGRAM_ID: Pubkey =
    pubkey!("GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw");

pub const TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");
pub const STAKE_PROGRAM_ID: Pubkey = pubkey!("Stake11111111111111111111111111111111111111");
pub const SYSTEM_PROGRAM_ID: Pubkey = pubkey!("11111111111111111111111111111111");
pub const BPF_UPGRADEABLE_LOADER_ID: Pubkey =
    pubkey!("BPFLoaderUpgradeab1e11111111111111111111111");

/// Wrapped SOL, used as the pricing mint for treasury wallets
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// Sentinel mint marking governance native SOL accounts. Never shown as a token.
pub const DEFAULT_NATIVE_SOL_MINT: Pubkey =
    pubkey!("GSoLvSToqaUmMyqP12GffzcirPAickrpZmVUFtek6x5u");

/// Sentinel mint marking NFT treasury accounts
pub const DEFAULT_NFT_TREASURY_MINT: Pubkey =
    pubkey!("GNFTm5rz1Kzvq94G7DJkcrEUnCypeQYf7Ya8arPoHWvw");

pub const NATIVE_TREASURY_SEED: &[u8] = b"native-treasury";

/// > solana rent 0 --lamports
pub const RENT_EXEMPT_MINIMUM_LAMPORTS: u64 = 890_880;

pub const SOL_DECIMALS: u8 = 9;

/// Max requests per JSON-RPC batch body
pub const MAX_BATCH_SIZE: usize = 100;

// memcmp offsets
pub const PROGRAM_DATA_AUTHORITY_OFFSET: usize = 13;
/// Discriminant, slot, option tag and authority of a ProgramData account
pub const PROGRAM_DATA_HEADER_LEN: usize = 45;
pub const PROGRAM_DATA_ADDRESS_OFFSET: usize = 4;
pub const STAKE_DISCRIMINANT_OFFSET: usize = 0;
pub const STAKE_AUTHORIZED_OFFSET: usize = 44;
pub const STAKE_VALIDATOR_OFFSET: usize = 124;
pub const GOVERNANCE_REALM_OFFSET: usize = 1;

pub const STAKE_INITIALIZED_DISCRIMINANT: [u8; 4] = [1, 0, 0, 0];
pub const STAKE_DELEGATED_DISCRIMINANT: [u8; 4] = [2, 0, 0, 0];

pub const LOADER_PROGRAM_DISCRIMINANT: [u8; 4] = [2, 0, 0, 0];
pub const LOADER_PROGRAM_DATA_DISCRIMINANT: [u8; 4] = [3, 0, 0, 0];
