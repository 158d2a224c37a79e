use solana_program::pubkey::Pubkey;
use thiserror::Error;

/// Errors raised while building a governance asset inventory.
///
/// Only `InvalidAddress` and `Config` ever reach a caller as a hard failure.
/// Everything else is scoped to one item or one stage and is recorded in the
/// stage report next to the partial result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// Malformed base58 input to the deriver or the static lists
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Transport or timeout failure for one address of a batch
    #[error("Fetch failed for {address}: {source}")]
    FetchFailure {
        address: Pubkey,
        #[source]
        source: FetchError,
    },

    /// The account does not exist on chain
    #[error("Account not found: {0}")]
    MissingAccount(Pubkey),

    /// A token account references a mint we could not load
    #[error("Missing mint info for token account {account} (mint {mint})")]
    MissingMintInfo { account: Pubkey, mint: Pubkey },

    /// Byte layout did not match the expected account format
    #[error("Could not decode {kind} account {address}: {reason}")]
    Decode {
        kind: &'static str,
        address: Pubkey,
        reason: String,
    },

    /// A whole orchestration stage failed and contributed nothing
    #[error("Stage {stage} failed: {reason}")]
    StageFailure { stage: Stage, reason: String },

    #[error("Config error: {0}")]
    Config(String),
}

/// Failure of one JSON-RPC batch or of one request inside it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

/// Orchestration stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tokens,
    Stake,
    Mints,
    Programs,
    Generic,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Tokens => "tokens",
            Stage::Stake => "stake",
            Stage::Mints => "mints",
            Stage::Programs => "programs",
            Stage::Generic => "generic",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = AssetError::StageFailure {
            stage: Stage::Programs,
            reason: "boom".to_string(),
        };
        assert_eq!(e.to_string(), "Stage programs failed: boom");

        let e = FetchError::Timeout(1500);
        assert_eq!(e.to_string(), "timed out after 1500 ms");
    }
}
