//! Command-line configuration for the scanner

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gov_assets::{
    config::{EngineConfig, StaticLists},
    state::parse_pubkey,
};
use solana_program::pubkey::Pubkey;

/// DAO treasury scanner
#[derive(Parser, Debug, Clone)]
#[command(name = "gov-assets-scanner")]
#[command(about = "Lists every asset controlled by a governance realm", long_about = None)]
pub struct Config {
    /// RPC URL
    #[arg(long, env = "RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    pub rpc_url: String,

    /// Governance program expected to own the realm
    #[arg(
        long,
        env = "GOVERNANCE_PROGRAM_ID",
        default_value = "GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw"
    )]
    pub governance_program_id: String,

    /// Realm address
    #[arg(long, env = "REALM")]
    pub realm: String,

    /// Engine config (TOML)
    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Static lists (TOML), replaces the lists of the engine config
    #[arg(long, env = "LISTS_PATH")]
    pub lists_path: Option<PathBuf>,

    /// Write the inventory JSON here instead of stdout
    #[arg(long, env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// After the full load, refresh this governance only
    #[arg(long)]
    pub refresh: Option<String>,
}

impl Config {
    pub fn realm_address(&self) -> Result<Pubkey> {
        parse_pubkey(&self.realm).context("invalid realm address")
    }

    pub fn governance_program(&self) -> Result<Pubkey> {
        parse_pubkey(&self.governance_program_id).context("invalid governance program id")
    }

    pub fn refresh_governance(&self) -> Result<Option<Pubkey>> {
        self.refresh
            .as_deref()
            .map(|s| parse_pubkey(s).context("invalid governance to refresh"))
            .transpose()
    }

    /// Engine config from file or defaults, with the lists override applied
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = match &self.config_path {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(path) = &self.lists_path {
            engine.lists = StaticLists::load(path)?;
        }
        Ok(engine)
    }
}
