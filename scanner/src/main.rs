//! Governance asset scanner
//!
//! Loads a realm and its governances from chain, runs a full inventory
//! rebuild and prints every asset the DAO controls as JSON.

mod config;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use gov_assets::{
    discovery::{load_governances, load_realm},
    price::PriceTable,
    rpc::HttpTransport,
    AssetAggregator, InventoryStore, StoreUpdate,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gov_assets=debug"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = Config::parse();
    let engine = config.engine_config()?;
    let realm_address = config.realm_address()?;
    let program_id = config.governance_program()?;

    info!("Scanner starting...");
    info!("RPC URL: {}", config.rpc_url);
    info!("Realm: {} (program {})", realm_address, program_id);

    let prices = Arc::new(PriceTable::new());
    let aggregator = AssetAggregator::new(HttpTransport::new(&config.rpc_url), &engine, prices);

    let realm = load_realm(aggregator.fetcher(), realm_address, Some(program_id))
        .await
        .context("loading realm")?;
    info!("Realm '{}' (community mint {})", realm.name, realm.community_mint);

    let governances = load_governances(aggregator.fetcher(), &realm)
        .await
        .context("loading governances")?;
    info!("Found {} governances", governances.len());

    let store = InventoryStore::new();
    let update = store.set_governances(&aggregator, &realm, governances).await;
    if let StoreUpdate::Applied(reports) = update {
        for report in reports.iter().filter(|r| !r.is_complete()) {
            warn!("{} stage: {} failures", report.stage, report.failures.len());
        }
    }

    if let Some(governance) = config.refresh_governance()? {
        match store.refresh_one(&aggregator, &realm, &governance).await {
            StoreUpdate::Applied(_) => info!("Refreshed governance {}", governance),
            StoreUpdate::UnknownGovernance(g) => {
                bail!("governance {} is not part of realm {}", g, realm.address)
            }
            StoreUpdate::Superseded => warn!("Refresh of {} superseded", governance),
        }
    }

    let snapshot = store.snapshot().await;
    let views: Vec<_> = snapshot
        .asset_accounts
        .iter()
        .map(|a| a.to_view(Some(aggregator.oracle())))
        .collect();
    let reports: Vec<_> = snapshot
        .reports
        .iter()
        .map(|r| {
            json!({
                "stage": r.stage,
                "produced": r.produced,
                "failures": r.failures.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                "error": r.error.as_ref().map(|e| e.to_string()),
            })
        })
        .collect();
    let output = json!({
        "realm": realm.address.to_string(),
        "name": &realm.name,
        "governances": snapshot.governances.len(),
        "total_usd": aggregator.total_usd_value(&snapshot.asset_accounts),
        "accounts": views,
        "reports": reports,
    });
    let rendered = serde_json::to_string_pretty(&output)?;

    match &config.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {} accounts to {}", snapshot.asset_accounts.len(), path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
