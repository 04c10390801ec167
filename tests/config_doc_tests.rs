//! Integration coverage for the asset config document (spec §3): the
//! dict-vs-list normalization step and the chain cross-reference invariant,
//! plus the liquidity category's TVL-by-chain pairing built on top of it
//! (spec §4.9's generalization of TVL-weighting to dex pools).

use chrono::Utc;
use morpho_risk_core::{
    catalog::MetricName,
    scoring::categories::liquidity,
    store::{MetricSample, MetricSnapshot},
};
use serde_json::json;

fn sample(metric: MetricName, value: f64, chain: &str) -> MetricSample {
    MetricSample {
        asset_symbol: "WBTC".to_string(),
        metric_name: metric,
        value,
        chain: Some(chain.to_string()),
        context: json!({}),
        triggered_at: Utc::now(),
    }
}

#[test]
fn config_with_matching_chains_validates() {
    let raw = json!({
        "token_addresses": [{"chain": "ethereum", "address": "0xabc"}, {"chain": "base", "address": "0xdef"}],
        "dex_pools": [{
            "protocol": "uniswap_v3",
            "chain": "base",
            "pool_address": "0x111",
            "pool_name": "WBTC/WETH"
        }]
    });
    let cfg = morpho_risk_core::config_doc::AssetConfig::from_raw(&raw).unwrap();
    cfg.validate().expect("base chain is covered by token_addresses");
}

#[test]
fn dict_keyed_dex_pools_normalize_into_a_list() {
    let raw = json!({
        "token_addresses": [{"chain": "ethereum", "address": "0xabc"}],
        "dex_pools": {
            "uni_main": {
                "protocol": "uniswap_v3",
                "chain": "ethereum",
                "pool_address": "0x111",
                "pool_name": "WBTC/WETH"
            },
            "curve_main": {
                "protocol": "curve",
                "chain": "ethereum",
                "pool_address": "0x222",
                "pool_name": "WBTC/renBTC"
            }
        }
    });
    let cfg = morpho_risk_core::config_doc::AssetConfig::from_raw(&raw).unwrap();
    assert_eq!(cfg.dex_pools.len(), 2);
    cfg.validate().unwrap();
}

#[test]
fn liquidity_slippage_weighs_each_pools_chain_by_its_own_tvl() {
    let snapshot = MetricSnapshot::from_samples(vec![
        sample(MetricName::PoolTvlUsd, 9_000_000.0, "ethereum"),
        sample(MetricName::PoolTvlUsd, 1_000_000.0, "base"),
        sample(MetricName::Slippage100kPct, 0.05, "ethereum"),
        sample(MetricName::Slippage100kPct, 2.0, "base"),
    ]);
    let result = liquidity(&snapshot);

    let deep_pool_only = MetricSnapshot::from_samples(vec![
        sample(MetricName::PoolTvlUsd, 9_000_000.0, "ethereum"),
        sample(MetricName::Slippage100kPct, 0.05, "ethereum"),
    ]);
    let deep_only_result = liquidity(&deep_pool_only);

    assert!(
        (result.score - deep_only_result.score).abs() < deep_only_result.score * 0.1,
        "the $9M ethereum pool should dominate the TVL-weighted average over the $1M base pool: \
         got {} vs deep-pool-only baseline {}",
        result.score,
        deep_only_result.score
    );
}
