use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{cache::RedisCache, catalog::MetricName, metrics::Metrics, registry::Asset, store::MetricSample};

use super::{FetchError, Fetcher, FetcherKind, Scope};

#[derive(Debug, Deserialize)]
struct HolderSnapshot {
    total_supply: f64,
    holder_balances: Vec<f64>,
}

/// Emits `gini`, `holder_hhi`, `top10_holder_concentration_pct` and
/// `total_supply` over the token's on-chain holder distribution (spec §4.4).
/// Named distinctly from the liquidity fetcher's pool-level `hhi` /
/// `top10_lp_concentration_pct` so the two concentration concerns can never
/// collide in a snapshot keyed by (metric, chain).
pub struct DistributionFetcher {
    http: reqwest::Client,
    cache: RedisCache,
    metrics: Metrics,
}

impl DistributionFetcher {
    pub fn new(http: reqwest::Client, cache: RedisCache, metrics: Metrics) -> Self {
        Self {
            http,
            cache,
            metrics,
        }
    }

    async fn fetch_snapshot(&self, token_address: &str) -> Result<HolderSnapshot, FetchError> {
        let url = format!("https://holder-index.internal/tokens/{token_address}");
        let key = format!("chain:v1:holders:{token_address}");

        if let Ok(Some(cached)) = self.cache.get_json::<HolderSnapshot>(&key).await {
            self.metrics.observe_hit("fetch", "holder_snapshot");
            return Ok(cached);
        }
        self.metrics.observe_miss("fetch", "holder_snapshot");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Distribution, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Distribution,
                retriable,
                cause: format!("holder index source returned {}", response.status()),
            });
        }

        let snapshot = response
            .json::<HolderSnapshot>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Distribution, &e))?;

        let _ = self
            .cache
            .set_json(&key, &snapshot, std::time::Duration::from_secs(3600))
            .await;

        Ok(snapshot)
    }
}

/// Population Gini coefficient over non-negative balances, 0 (perfectly
/// even) to ~1 (perfectly concentrated).
fn gini_coefficient(balances: &[f64]) -> f64 {
    let n = balances.len();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = balances.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let weighted_sum: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, b)| (i as f64 + 1.0) * b)
        .sum();

    (2.0 * weighted_sum) / (n as f64 * total) - (n as f64 + 1.0) / n as f64
}

fn herfindahl_hirschman_index(balances: &[f64]) -> f64 {
    let total: f64 = balances.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    balances
        .iter()
        .map(|b| {
            let pct = (b / total) * 100.0;
            pct * pct
        })
        .sum()
}

fn top10_concentration_pct(balances: &[f64]) -> f64 {
    let total: f64 = balances.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top10: f64 = sorted.iter().take(10).sum();
    (top10 / total) * 100.0
}

#[async_trait]
impl Fetcher for DistributionFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Distribution
    }

    async fn fetch(&self, asset: &Asset, _scope: &Scope) -> Result<Vec<MetricSample>, FetchError> {
        let Some(token) = asset.config.token_addresses.first() else {
            return Ok(vec![]);
        };
        let now = Utc::now();
        let snapshot = self.fetch_snapshot(&token.address).await?;
        let chain = Some(format!("{:?}", token.chain).to_lowercase());
        let context = json!({"holder_count": snapshot.holder_balances.len()});

        Ok(vec![
            MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::TotalSupply,
                value: snapshot.total_supply,
                chain: chain.clone(),
                context: context.clone(),
                triggered_at: now,
            },
            MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Gini,
                value: gini_coefficient(&snapshot.holder_balances),
                chain: chain.clone(),
                context: context.clone(),
                triggered_at: now,
            },
            MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::HolderHhi,
                value: herfindahl_hirschman_index(&snapshot.holder_balances),
                chain: chain.clone(),
                context: context.clone(),
                triggered_at: now,
            },
            MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Top10HolderConcentrationPct,
                value: top10_concentration_pct(&snapshot.holder_balances),
                chain,
                context,
                triggered_at: now,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gini_of_even_distribution_is_zero() {
        let balances = vec![10.0, 10.0, 10.0, 10.0];
        assert!(gini_coefficient(&balances).abs() < 1e-9);
    }

    #[test]
    fn gini_of_single_holder_approaches_one() {
        let balances = vec![0.0, 0.0, 0.0, 100.0];
        let g = gini_coefficient(&balances);
        assert!(g > 0.7 && g <= 1.0);
    }
}
