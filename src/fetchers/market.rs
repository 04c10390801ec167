use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{cache::RedisCache, catalog::MetricName, metrics::Metrics, registry::Asset, store::MetricSample};

use super::{FetchError, Fetcher, FetcherKind, Scope};

#[derive(Debug, Deserialize)]
struct PricePoint {
    price_usd: f64,
}

#[derive(Debug, Deserialize)]
struct PriceHistory {
    /// Daily closes, oldest first, spanning up to 365 days.
    daily_closes: Vec<f64>,
}

/// Emits `peg_deviation_pct` (when `price_risk` is configured) and the
/// volatility/tail-risk family computed over trailing daily closes (spec
/// §4.4, §4.9).
pub struct MarketFetcher {
    http: reqwest::Client,
    cache: RedisCache,
    metrics: Metrics,
}

impl MarketFetcher {
    pub fn new(http: reqwest::Client, cache: RedisCache, metrics: Metrics) -> Self {
        Self {
            http,
            cache,
            metrics,
        }
    }

    async fn fetch_price(&self, price_id: &str) -> Result<f64, FetchError> {
        let url = format!("https://price-feed.internal/prices/{price_id}");
        let key = format!("chain:v1:price:{price_id}");

        if let Ok(Some(cached)) = self.cache.get_json::<PricePoint>(&key).await {
            self.metrics.observe_hit("fetch", "price");
            return Ok(cached.price_usd);
        }
        self.metrics.observe_miss("fetch", "price");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Market, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Market,
                retriable,
                cause: format!("price feed source returned {}", response.status()),
            });
        }

        let point = response
            .json::<PricePoint>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Market, &e))?;

        let _ = self
            .cache
            .set_json(&key, &point, std::time::Duration::from_secs(30))
            .await;

        Ok(point.price_usd)
    }

    async fn fetch_history(&self, price_id: &str) -> Result<PriceHistory, FetchError> {
        let url = format!("https://price-feed.internal/history/{price_id}?days=365");
        let key = format!("chain:v1:price_history:{price_id}");

        if let Ok(Some(cached)) = self.cache.get_json::<PriceHistory>(&key).await {
            self.metrics.observe_hit("fetch", "price_history");
            return Ok(cached);
        }
        self.metrics.observe_miss("fetch", "price_history");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Market, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Market,
                retriable,
                cause: format!("price history source returned {}", response.status()),
            });
        }

        let history = response
            .json::<PriceHistory>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Market, &e))?;

        let _ = self
            .cache
            .set_json(&key, &history, std::time::Duration::from_secs(3600))
            .await;

        Ok(history)
    }
}

fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn annualized_volatility_pct(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    variance.sqrt() * (365.0_f64).sqrt() * 100.0
}

/// Historical 95% one-day Value-at-Risk, expressed as a positive percentage
/// loss (spec §4.9 anchors operate on the loss magnitude).
fn historical_var95_pct(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64) * 0.05).floor() as usize;
    let idx = idx.min(sorted.len() - 1);
    (-sorted[idx]).max(0.0) * 100.0
}

/// Expected shortfall beyond the 95% VaR threshold.
fn historical_cvar95_pct(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let cutoff = ((sorted.len() as f64) * 0.05).floor() as usize;
    let cutoff = cutoff.max(1).min(sorted.len());
    let tail = &sorted[..cutoff];
    let mean_tail = tail.iter().sum::<f64>() / tail.len() as f64;
    (-mean_tail).max(0.0) * 100.0
}

fn price_deviation_365d_max_pct(closes: &[f64]) -> f64 {
    let Some(&anchor) = closes.first() else {
        return 0.0;
    };
    if anchor <= 0.0 {
        return 0.0;
    }
    closes
        .iter()
        .map(|c| ((c - anchor).abs() / anchor) * 100.0)
        .fold(0.0, f64::max)
}

#[async_trait]
impl Fetcher for MarketFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Market
    }

    async fn fetch(&self, asset: &Asset, _scope: &Scope) -> Result<Vec<MetricSample>, FetchError> {
        let now = Utc::now();
        let mut samples = Vec::new();

        if let Some(price_risk) = &asset.config.price_risk {
            let token_price = self.fetch_price(&price_risk.token_price_id).await?;
            let underlying_price = self.fetch_price(&price_risk.underlying_price_id).await?;
            if underlying_price > 0.0 {
                let deviation = ((token_price / underlying_price) - 1.0) * 100.0;
                samples.push(MetricSample {
                    asset_symbol: asset.symbol.clone(),
                    metric_name: MetricName::PegDeviationPct,
                    value: deviation,
                    chain: None,
                    context: json!({
                        "token_price_usd": token_price,
                        "underlying_price_usd": underlying_price,
                    }),
                    triggered_at: now,
                });
            }

            let history = self.fetch_history(&price_risk.token_price_id).await?;
            let returns = daily_returns(&history.daily_closes);

            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::VolatilityAnnualizedPct,
                value: annualized_volatility_pct(&returns),
                chain: None,
                context: json!({"sample_days": history.daily_closes.len()}),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Var95Pct,
                value: historical_var95_pct(&returns),
                chain: None,
                context: json!({"sample_days": history.daily_closes.len()}),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::Cvar95Pct,
                value: historical_cvar95_pct(&returns),
                chain: None,
                context: json!({"sample_days": history.daily_closes.len()}),
                triggered_at: now,
            });
            samples.push(MetricSample {
                asset_symbol: asset.symbol.clone(),
                metric_name: MetricName::PriceDeviation365dMaxPct,
                value: price_deviation_365d_max_pct(&history.daily_closes),
                chain: None,
                context: json!({"sample_days": history.daily_closes.len()}),
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
    fn zero_variance_series_has_zero_volatility() {
        let returns = vec![0.0, 0.0, 0.0];
        assert_eq!(annualized_volatility_pct(&returns), 0.0);
    }

    #[test]
    fn max_deviation_tracks_largest_swing() {
        let closes = vec![100.0, 110.0, 80.0, 95.0];
        assert!((price_deviation_365d_max_pct(&closes) - 20.0).abs() < 1e-9);
    }
}
