//! Governance asset aggregation.
//!
//! Given a realm and its governances, discovers every asset the DAO controls
//! (token accounts, mints, treasury wallets, stake accounts, programs and
//! governed accounts), classifies them and keeps a deduplicated inventory.

pub mod aggregator;
pub mod assets;
pub mod cache;
pub mod classify;
pub mod config;
pub mod consts;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod price;
pub mod rpc;
pub mod state;
pub mod store;

pub use aggregator::{AssetAggregator, Inventory, StageReport};
pub use assets::{AccountType, AssetAccount, AssetKind};
pub use error::{AssetError, FetchError};
pub use store::{InventoryStore, StoreUpdate};
