use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    cache::RedisCache,
    catalog::MetricName,
    config_doc::LendingConfig,
    metrics::Metrics,
    registry::Asset,
    store::MetricSample,
};

use super::{FetchError, Fetcher, FetcherKind, Scope};

#[derive(Debug, Deserialize)]
struct MarketDepth {
    total_supplied_usd: f64,
    total_borrowed_usd: f64,
    /// Collateral that would be force-liquidated under the market's modeled
    /// cascade price-drop scenario.
    liquidatable_collateral_usd: f64,
    total_collateral_usd: f64,
    /// Collateral deposits funded by borrowing against the same asset
    /// (looped/recursive positions).
    recursive_borrow_usd: f64,
}

/// Emits `utilization_rate`, `clr_pct`, `rlr_pct` per lending market (spec
/// §4.4). Each sample carries the market's protocol/chain as anchor context
/// since scoring weights markets by TVL (spec §4.9).
pub struct LendingFetcher {
    http: reqwest::Client,
    cache: RedisCache,
    metrics: Metrics,
}

impl LendingFetcher {
    pub fn new(http: reqwest::Client, cache: RedisCache, metrics: Metrics) -> Self {
        Self {
            http,
            cache,
            metrics,
        }
    }

    fn market_key(market: &LendingConfig) -> String {
        market
            .pool
            .as_deref()
            .or(market.comet.as_deref())
            .or(market.data_provider.as_deref())
            .unwrap_or(&market.token_address)
            .to_string()
    }

    async fn fetch_depth(&self, market: &LendingConfig) -> Result<MarketDepth, FetchError> {
        let market_id = Self::market_key(market);
        let url = format!("https://lending-depth.internal/markets/{market_id}");
        let key = format!("chain:v1:lending_market:{market_id}");

        if let Ok(Some(cached)) = self.cache.get_json::<MarketDepth>(&key).await {
            self.metrics.observe_hit("fetch", "lending_market");
            return Ok(cached);
        }
        self.metrics.observe_miss("fetch", "lending_market");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Lending, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Lending,
                retriable,
                cause: format!("lending market source returned {}", response.status()),
            });
        }

        let depth = response
            .json::<MarketDepth>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Lending, &e))?;

        let _ = self
            .cache
            .set_json(&key, &depth, std::time::Duration::from_secs(120))
            .await;

        Ok(depth)
    }
}

#[async_trait]
impl Fetcher for LendingFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Lending
    }

    async fn fetch(&self, asset: &Asset, scope: &Scope) -> Result<Vec<MetricSample>, FetchError> {
        if asset.config.lending_configs.is_empty() {
            return Ok(vec![]);
        }
        let now = Utc::now();
        let mut samples = Vec::new();

        let markets: Vec<(usize, &LendingConfig)> = match scope {
            Scope::LendingMarket(idx) => asset
                .config
                .lending_configs
                .get(*idx)
                .map(|m| vec![(*idx, m)])
                .unwrap_or_default(),
            _ => asset.config.lending_configs.iter().enumerate().collect(),
        };

        for (idx, market) in markets {
            let depth = self.fetch_depth(market).await?;
            let chain = format!("{:?}", market.chain).to_lowercase();
            let context = json!({
                "protocol": format!("{:?}", market.protocol).to_lowercase(),
                "market_name": market.market_name,
                "market_index": idx,
                "total_supplied_usd": depth.total_supplied_usd,
            });

            let utilization_rate = if depth.total_supplied_usd > 0.0 {
                (depth.total_borrowed_usd / depth.total_supplied_usd) * 100.0
            } else {
                0.0
            };

            let clr_pct = if depth.total_collateral_usd > 0.0 {
                (depth.liquidatable_collateral_usd / depth.total_collateral_usd) * 100.0
            } else {
                0.0
            };

            let rlr_pct = if depth.total_collateral_usd > 0.0 {
                (depth.recursive_borrow_usd / depth.total_collateral_usd) * 100.0
            } else {
                0.0
            };

            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::UtilizationRate,
                value: utilization_rate,
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::ClrPct,
                value: clr_pct,
                chain: Some(chain.clone()),
                context: context.clone(),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::RlrPct,
                value: rlr_pct,
                chain: Some(chain),
                context,
                triggered_at: now,
            });
        }

        Ok(samples)
    }
}
