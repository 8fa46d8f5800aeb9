use alloy::primitives::Address;
use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::pipeline::ChainSponsorshipStats;
use crate::sponsor::StatsSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub chain_id: u64,
    pub name: String,
    pub entry_point: Address,
    pub factory: Address,
    pub sponsorship_enabled: bool,
    pub paymaster_available: bool,
}

/// `GET /api/bundler/supported-chains`
pub async fn supported_chains(State(state): State<AppState>) -> Json<Vec<ChainSummary>> {
    let registry = state.pipeline.registry();
    let chains = registry
        .chains()
        .into_iter()
        .map(|chain| ChainSummary {
            chain_id: chain.chain_id(),
            name: chain.config.name.clone(),
            entry_point: chain.config.entry_point,
            factory: chain.config.factory,
            sponsorship_enabled: chain.config.sponsorship_enabled,
            paymaster_available: chain.sponsorship.is_available(),
        })
        .collect();
    Json(chains)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterNetwork {
    pub chain_id: u64,
    pub name: String,
    /// Sponsorship is requested by default for operations on this chain.
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterConfig {
    pub supported: bool,
    pub networks: Vec<PaymasterNetwork>,
}

/// `GET /api/paymaster/config`
pub async fn paymaster_config(State(state): State<AppState>) -> Json<PaymasterConfig> {
    let registry = state.pipeline.registry();
    let networks: Vec<_> = registry
        .chains()
        .into_iter()
        .filter(|chain| chain.sponsorship.is_available())
        .map(|chain| PaymasterNetwork {
            chain_id: chain.chain_id(),
            name: chain.config.name.clone(),
            enabled: chain.default_sponsorship().enabled,
        })
        .collect();
    Json(PaymasterConfig {
        supported: !networks.is_empty(),
        networks,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterStats {
    /// Totals across all chains.
    #[serde(flatten)]
    pub total: StatsSnapshot,
    pub networks: Vec<ChainSponsorshipStats>,
}

/// `GET /api/paymaster/stats`
pub async fn paymaster_stats(State(state): State<AppState>) -> Json<PaymasterStats> {
    let networks = state.pipeline.sponsorship_stats();
    let mut total = StatsSnapshot::default();
    for network in &networks {
        total.merge(&network.stats);
    }
    Json(PaymasterStats { total, networks })
}
