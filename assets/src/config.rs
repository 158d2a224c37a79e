//! Engine configuration and the static per-DAO lists.
//!
//! Both load from TOML. The list defaults carry the curated production values.

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::{error::AssetError, state::parse_pubkey};

/// Fetcher tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Requests per JSON-RPC batch body
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Batches in flight at once
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Per-batch timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_max_batch_size() -> usize {
    crate::consts::MAX_BATCH_SIZE
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            request_timeout_ms: default_request_timeout_ms(),
            commitment: default_commitment(),
        }
    }
}

/// Owner plus the token accounts of that owner to surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryEntry {
    pub owner: String,
    pub accounts: Vec<String>,
}

/// Curated lists consulted during aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLists {
    /// Governances never loaded (misconfigured or legacy)
    #[serde(default)]
    pub hidden_governances: HashSet<String>,

    /// Asset accounts never shown
    #[serde(default)]
    pub hidden_treasures: HashSet<String>,

    /// DAO name -> mints checked besides the community and council mints
    #[serde(default)]
    pub extra_mints: BTreeMap<String, Vec<String>>,

    /// DAO name -> allow-listed token accounts outside governance ownership
    #[serde(default)]
    pub auxiliary_token_accounts: BTreeMap<String, Vec<AuxiliaryEntry>>,
}

impl StaticLists {
    /// Lists with nothing in them
    pub fn empty() -> Self {
        Self {
            hidden_governances: HashSet::new(),
            hidden_treasures: HashSet::new(),
            extra_mints: BTreeMap::new(),
            auxiliary_token_accounts: BTreeMap::new(),
        }
    }

    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AssetError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, AssetError> {
        let lists: StaticLists =
            toml::from_str(contents).map_err(|e| AssetError::Config(e.to_string()))?;
        lists.validate()?;
        Ok(lists)
    }

    /// Every entry must be a valid address
    pub fn validate(&self) -> Result<(), AssetError> {
        let all = self
            .hidden_governances
            .iter()
            .chain(self.hidden_treasures.iter())
            .chain(self.extra_mints.values().flatten())
            .chain(
                self.auxiliary_token_accounts
                    .values()
                    .flatten()
                    .flat_map(|e| std::iter::once(&e.owner).chain(e.accounts.iter())),
            );
        for s in all {
            parse_pubkey(s)?;
        }
        Ok(())
    }

    pub fn is_hidden_governance(&self, governance: &Pubkey) -> bool {
        self.hidden_governances.contains(&governance.to_string())
    }

    pub fn is_hidden_treasure(&self, address: &Pubkey) -> bool {
        self.hidden_treasures.contains(&address.to_string())
    }

    pub fn extra_mints(&self, dao_name: &str) -> Vec<Pubkey> {
        self.extra_mints
            .get(dao_name)
            .map(|list| list.iter().filter_map(|s| parse_pubkey(s).ok()).collect())
            .unwrap_or_default()
    }

    /// (owner, account) pairs allow-listed for the DAO
    pub fn auxiliary_accounts(&self, dao_name: &str) -> Vec<(Pubkey, Pubkey)> {
        self.auxiliary_token_accounts
            .get(dao_name)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| parse_pubkey(&e.owner).ok().map(|owner| (owner, e)))
                    .flat_map(|(owner, e)| {
                        e.accounts
                            .iter()
                            .filter_map(move |a| parse_pubkey(a).ok().map(|a| (owner, a)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for StaticLists {
    fn default() -> Self {
        let hidden_governances = [
            "HfWc8M6Df5wtLg8xg5vti4QKAo9KG4nL5gKQ8B2sjfYC",
            "A3Fb876sEiUmDWgrJ1fShASstw8b5wHB6XETzQa8VM7S",
            "2j2oe8YXdYJyS7G8CeEW5KARijdjjZkuPy5MnN8gBQqQ",
            "56yqzBEr9BqDGjYPJz9G8LVQrbXsQM2t2Yq3Gk8S56d1",
            "4styeLGsBRpV4xKsCNMRPb94U7JN8ZXoXJTLZA5hdjo9",
            "CKWNNwtn5nbsGMkvtRwHDv4QTyoHMByKVd7Ypo2deNpc",
            "G8JgCHfca7PehBwRp1Q91smJ9CXAd8K9e9CpfVjyD2MP",
        ];

        // Zero-value tokens whose freeze authority blocks closing the account
        let hidden_treasures = [
            "GZQSF4Fh9xK7rf9WBEhawXYFw8qPXeatZLUqVQeuW3X8",
            "J6jYLFDWeeGwg4u2TXhKDCcH4fSzJFQyDE2VSv2drRkg",
            "HXxjhCQwm496HAXsHBWfuVkiXBLinHJqUbVKomCjKsfo",
            "EwPgko6gXD5PAgQaFo1KD7R9tPUEgRcTAfsGvgdhkP4Z",
            "6VYcrmbK4QNC7WpfVRXBAXP59ZH2FkUMBoMYhtgENGMn",
            "4Z8nAK9grjokaUqJNtw2AEkYAR1vcw8pkCWZcbVEEdh5",
            "FTiWWq3cgETfPkYqP36xFUhT7KMoFYyCiPKeYQU1e4U8",
            "FrkLPsCadx4tE4qDobbu2GTD5ffjWBpormHbLLy35PUS",
            "CaoFkVyPJugKMdzDT1NGnsQJ8dWe4kZFaETCbtWz1QBr",
            "PuXf9LNrmtVDhBTxteNTWS8D2SpzbhYvidkSatjRArt",
        ];

        let mut extra_mints = BTreeMap::new();
        extra_mints.insert(
            "Mango".to_string(),
            strings(&[
                "EGk8Gw7Z484mzAKb7GwCcqrZd4KwwsyU2Dv9woY6uDQu",
                "8gjzxiqcU87cvRc7hFiUJgxqLSV7AQnSttfWC5fD9aim",
                "G1Yc5696GcfL28uAWG6iCaKJwZd8sQzwPJTc2UacsjHN",
                "oW7juZxrhaGvWw5giRp3P3qTHEZpg2t8n8aXTCpBjNK",
            ]),
        );

        let entry = |owner: &str, accounts: &[&str]| AuxiliaryEntry {
            owner: owner.to_string(),
            accounts: strings(accounts),
        };
        let mut auxiliary_token_accounts = BTreeMap::new();
        auxiliary_token_accounts.insert(
            "Mango".to_string(),
            vec![
                entry(
                    "58apybWwtWwgVfARs7uJ75Vs1csPimnCCFth7cKwTJAe",
                    &["DiSDgMz4DeNKHXkpqUGoukr1YM9xxc1wH9gusZnMa1ga"],
                ),
                entry(
                    "7hqfhmXK6uXQKmNjUVEJo5acDMLcnyN9p9bZ5Dmnifde",
                    &["2gDu12CM56g18Ukc9R1EdmEbToXqGTrnBEqR3zKfVKgt"],
                ),
                // treasury management council
                entry(
                    "9so7UTo6b6LXBSqdDfh18hjVj8Ng5BmLbYXLB7UrhaaJ",
                    &[
                        "A9xaHx54B9bRYBga4V6LKFrRaARpMJFYVooEXRAanru5",
                        "8Wkbx6Daq3RQY492HaXK2nbVLXKCL5SGcab3RHzBCzpV",
                        "7D2j3MpXMveMEkdR94QfMh5nS3HdFD7uQHKhaLenR8u6",
                        "5d5CU8viHKiwrwjgNUFtb6AxUjdiZ1xmLo2m3AMYa9K5",
                    ],
                ),
                // boost council
                entry(
                    "BExGoGVK6k6mUL6oHmabbc2EtwNqhJUeNoJWijF6t3ZB",
                    &[
                        "HuDbGjhoPMWxVUxJmaY4uinDF5RmSufg2SCwjxpCRvXX",
                        "AnmvgZbSre3NyGn4CeSNZDTN7NMmribt4eNTFDAQSGuv",
                    ],
                ),
                // vsr
                entry(
                    "DZZWE1PR8qTkH3dLTrD7kcNEs6xx3GmSuFbzW29dyHv7",
                    &["CJoHzb9FVJUKanFdmjjXD84Hg94qgE4egu8s2tGYTVdE"],
                ),
                entry(
                    "VrT8f16NLADvYR73YiDMwxZREPbJgiZqLvN6HLQj4hR",
                    &["BkNq5TQvPkDnQWNgn1j2Q2SAFe3r5m2PazRwC7YUSHAT"],
                ),
                entry(
                    "3H5PPK1bhHKmCAG5zwUyxpKDijES3H9uRAUCBrW8rGPX",
                    &["3sC3vzVz9YoiR12QKgvxHD6Q2LBfhL1ev63tsUaUS2EJ"],
                ),
                entry(
                    "DdZWj3nWSzJMMv1LMTHm9gTJ37wHLNXTMzqjWCokvKEn",
                    &["6XfCUQuq4juhqWLCW6LeivZd1eGuCRp4Mw3D6nkwXwFG"],
                ),
                entry(
                    "7v1dD4kTJcBC7zV9MSrz7Ddyz8Dvs24QUMnZeQQCxeyV",
                    &["CEGxhB84XffJBfXm8WphwSczrpaJX6cRJjZz3QqNWJSZ"],
                ),
                entry(
                    "A99Whcw3pNdYXQ1DikQsLLNNjbsw8rD1zdvX4LTvZ8pD",
                    &["CkxhXSSgqBM7HrZE6zrQPBNCb7eHN4nm1FHd3Ad1XARX"],
                ),
                entry(
                    "FRYXAjyVnvXja8chgdq47qL3CKoyBjUg4ro7M7QQn1aD",
                    &["24frxVoDzo7bAimBU6rDhB1McxWNvzX9qddPMSv9VACZ"],
                ),
            ],
        );

        Self {
            hidden_governances: hidden_governances.iter().map(|s| s.to_string()).collect(),
            hidden_treasures: hidden_treasures.iter().map(|s| s.to_string()).collect(),
            extra_mints,
            auxiliary_token_accounts,
        }
    }
}

/// Engine configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    /// How long owner token-account lookups stay cached
    #[serde(default = "default_token_cache_ttl_secs")]
    pub token_cache_ttl_secs: u64,

    #[serde(default)]
    pub lists: StaticLists,
}

fn default_token_cache_ttl_secs() -> u64 {
    600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            token_cache_ttl_secs: default_token_cache_ttl_secs(),
            lists: StaticLists::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AssetError::Config(format!("{}: {}", path.display(), e)))?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| AssetError::Config(e.to_string()))?;
        config.lists.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lists_are_valid() {
        let lists = StaticLists::default();
        lists.validate().unwrap();
        assert_eq!(lists.extra_mints("Mango").len(), 4);
        assert!(lists.extra_mints("Unknown").is_empty());
        assert_eq!(lists.auxiliary_accounts("Mango").len(), 15);
    }

    #[test]
    fn test_hidden_lookups() {
        let lists = StaticLists::default();
        let hidden: Pubkey = "PuXf9LNrmtVDhBTxteNTWS8D2SpzbhYvidkSatjRArt".parse().unwrap();
        assert!(lists.is_hidden_treasure(&hidden));
        assert!(!lists.is_hidden_treasure(&Pubkey::new_unique()));

        let gov: Pubkey = "HfWc8M6Df5wtLg8xg5vti4QKAo9KG4nL5gKQ8B2sjfYC".parse().unwrap();
        assert!(lists.is_hidden_governance(&gov));
    }

    #[test]
    fn test_lists_from_toml() {
        let owner = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let contents = format!(
            r#"
hidden_treasures = ["{account}"]

[[auxiliary_token_accounts.Test]]
owner = "{owner}"
accounts = ["{account}"]
"#
        );
        let lists = StaticLists::from_toml(&contents).unwrap();
        assert!(lists.is_hidden_treasure(&account));
        assert_eq!(lists.auxiliary_accounts("Test"), vec![(owner, account)]);
        assert!(lists.hidden_governances.is_empty());
    }

    #[test]
    fn test_invalid_list_entry() {
        let err = StaticLists::from_toml(r#"hidden_governances = ["nope"]"#).unwrap_err();
        assert_eq!(err, AssetError::InvalidAddress("nope".to_string()));
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = toml::from_str("[rpc]\nmax_batch_size = 50\n").unwrap();
        assert_eq!(config.rpc.max_batch_size, 50);
        assert_eq!(config.rpc.max_concurrent_batches, 4);
        assert_eq!(config.token_cache_ttl_secs, 600);
        assert_eq!(config.lists, StaticLists::default());
    }
}
