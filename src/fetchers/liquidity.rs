use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    cache::RedisCache,
    catalog::MetricName,
    config_doc::DexPool,
    metrics::Metrics,
    registry::Asset,
    store::MetricSample,
};

use super::{FetchError, Fetcher, FetcherKind, Scope};

#[derive(Debug, Deserialize)]
struct PoolDepth {
    tvl_usd: f64,
    slippage_100k_pct: f64,
    slippage_500k_pct: f64,
    lp_shares: Vec<f64>,
}

/// Emits per-pool depth metrics plus the pool-level concentration indices
/// (HHI, top-10 LP share) computed over `lp_shares` (spec §4.4, §4.9 anchors).
pub struct LiquidityFetcher {
    http: reqwest::Client,
    cache: RedisCache,
    metrics: Metrics,
}

impl LiquidityFetcher {
    pub fn new(http: reqwest::Client, cache: RedisCache, metrics: Metrics) -> Self {
        Self {
            http,
            cache,
            metrics,
        }
    }

    async fn fetch_depth(&self, pool: &DexPool) -> Result<PoolDepth, FetchError> {
        let url = format!("https://dex-depth.internal/pools/{}", pool.pool_address);
        let key = format!("chain:v1:pool_depth:{}", pool.pool_address);

        if let Ok(Some(cached)) = self.cache.get_json::<PoolDepth>(&key).await {
            self.metrics.observe_hit("fetch", "pool_depth");
            return Ok(cached);
        }
        self.metrics.observe_miss("fetch", "pool_depth");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Liquidity, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Liquidity,
                retriable,
                cause: format!("pool depth source returned {}", response.status()),
            });
        }

        let depth = response
            .json::<PoolDepth>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Liquidity, &e))?;

        let _ = self
            .cache
            .set_json(&key, &depth, std::time::Duration::from_secs(120))
            .await;

        Ok(depth)
    }
}

/// Herfindahl-Hirschman Index over fractional shares, scaled 0..10000 as the
/// catalog's seed thresholds expect (spec §6).
fn herfindahl_hirschman_index(shares: &[f64]) -> f64 {
    let total: f64 = shares.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    shares
        .iter()
        .map(|s| {
            let pct = (s / total) * 100.0;
            pct * pct
        })
        .sum()
}

fn top10_concentration_pct(shares: &[f64]) -> f64 {
    let total: f64 = shares.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut sorted = shares.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top10: f64 = sorted.iter().take(10).sum();
    (top10 / total) * 100.0
}

#[async_trait]
impl Fetcher for LiquidityFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Liquidity
    }

    async fn fetch(&self, asset: &Asset, scope: &Scope) -> Result<Vec<MetricSample>, FetchError> {
        if asset.config.dex_pools.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();
        let mut samples = Vec::new();

        let pools: Vec<(usize, &DexPool)> = match scope {
            Scope::DexPool(idx) => asset
                .config
                .dex_pools
                .get(*idx)
                .map(|p| vec![(*idx, p)])
                .unwrap_or_default(),
            _ => asset.config.dex_pools.iter().enumerate().collect(),
        };

        for (idx, pool) in pools {
            let depth = self.fetch_depth(pool).await?;
            let chain = format!("{:?}", pool.chain).to_lowercase();
            let context = json!({"pool_name": pool.pool_name, "pool_index": idx});

            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::PoolTvlUsd,
                value: depth.tvl_usd,
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Slippage100kPct,
                value: depth.slippage_100k_pct,
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Slippage500kPct,
                value: depth.slippage_500k_pct,
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Hhi,
                value: herfindahl_hirschman_index(&depth.lp_shares),
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Top10LpConcentrationPct,
                value: top10_concentration_pct(&depth.lp_shares),
                chain: Some(chain),
                context,
                triggered_at: now,
            });
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhi_of_equal_shares_is_low() {
        let shares = vec![25.0, 25.0, 25.0, 25.0];
        assert!((herfindahl_hirschman_index(&shares) - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn hhi_of_single_holder_is_max() {
        let shares = vec![100.0];
        assert!((herfindahl_hirschman_index(&shares) - 10000.0).abs() < 1e-9);
    }
}
