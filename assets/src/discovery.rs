//! Realm and governance discovery.

use solana_program::pubkey::Pubkey;

use crate::{
    consts::GOVERNANCE_REALM_OFFSET,
    error::AssetError,
    rpc::{BatchTransport, BatchedFetcher, Encoding, FetchKind, FetchOutcome, MemcmpFilter},
    state::{decode_governance, decode_realm, Governance, Realm},
};

/// Load a realm. The governance program is the account's owner; a differing
/// `expected_program` is only reported.
pub async fn load_realm<T: BatchTransport>(
    fetcher: &BatchedFetcher<T>,
    address: Pubkey,
    expected_program: Option<Pubkey>,
) -> Result<Realm, AssetError> {
    let results = fetcher
        .fetch_accounts(&[address], &FetchKind::Generic(Encoding::Base64))
        .await;
    let account = match results.get(&address) {
        Some(FetchOutcome::Failed(source)) => {
            return Err(AssetError::FetchFailure {
                address,
                source: source.clone(),
            })
        }
        _ => results.account(&address).ok_or(AssetError::MissingAccount(address))?,
    };

    if let Some(expected) = expected_program {
        if expected != account.owner {
            tracing::warn!(
                "Realm {} is owned by {}, not the configured program {}",
                address,
                account.owner,
                expected
            );
        }
    }
    decode_realm(address, account.owner, &account.data)
}

/// Every governance account of `realm`, sorted by address
pub async fn load_governances<T: BatchTransport>(
    fetcher: &BatchedFetcher<T>,
    realm: &Realm,
) -> Result<Vec<Governance>, AssetError> {
    let kind = FetchKind::ProgramAccountsByFilter {
        program_id: realm.program_id,
        filters: vec![MemcmpFilter::queried_address(GOVERNANCE_REALM_OFFSET)],
        data_slice: None,
    };
    let results = fetcher.fetch_accounts(&[realm.address], &kind).await;

    let accounts = match results.get(&realm.address) {
        Some(FetchOutcome::Found(accounts)) => accounts,
        Some(FetchOutcome::Failed(source)) => {
            return Err(AssetError::FetchFailure {
                address: realm.address,
                source: source.clone(),
            })
        }
        _ => return Ok(Vec::new()),
    };

    let mut governances = Vec::new();
    for keyed in accounts {
        // token owner records and other realm-scoped accounts share the offset
        match decode_governance(keyed.pubkey, realm.program_id, &keyed.account.data) {
            Ok(governance) => governances.push(governance),
            Err(e) => tracing::trace!("skipping {}: {}", keyed.pubkey, e),
        }
    }
    governances.sort_by_key(|g| g.address.to_bytes());
    Ok(governances)
}
