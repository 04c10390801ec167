use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    cache::RedisCache,
    catalog::MetricName,
    config_doc::ProofOfReserve,
    metrics::Metrics,
    registry::Asset,
    store::MetricSample,
};

use super::{FetchError, Fetcher, FetcherKind, Scope};

#[derive(Debug, Deserialize)]
struct ReserveReading {
    reserve_amount: f64,
    circulating_supply: f64,
}

#[derive(Debug, Deserialize)]
struct ScraperReading {
    por_ratio: f64,
}

/// Emits `por_ratio`, branching on the `ProofOfReserve` variant since each
/// attestation mechanism is read from a different source shape (spec §4.4).
pub struct ReserveFetcher {
    http: reqwest::Client,
    cache: RedisCache,
    metrics: Metrics,
}

impl ReserveFetcher {
    pub fn new(http: reqwest::Client, cache: RedisCache, metrics: Metrics) -> Self {
        Self {
            http,
            cache,
            metrics,
        }
    }

    async fn fetch_reserve_reading(&self, cache_key: &str, url: &str) -> Result<ReserveReading, FetchError> {
        if let Ok(Some(cached)) = self.cache.get_json::<ReserveReading>(cache_key).await {
            self.metrics.observe_hit("fetch", "reserve");
            return Ok(cached);
        }
        self.metrics.observe_miss("fetch", "reserve");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Reserve, &e))?;

        if !response.status().is_success() {
            let retriable = response.status().is_server_error() || response.status().as_u16() == 429;
            return Err(FetchError {
                kind: FetcherKind::Reserve,
                retriable,
                cause: format!("reserve source returned {}", response.status()),
            });
        }

        let reading = response
            .json::<ReserveReading>()
            .await
            .map_err(|e| FetchError::from_reqwest(FetcherKind::Reserve, &e))?;

        let _ = self
            .cache
            .set_json(cache_key, &reading, std::time::Duration::from_secs(300))
            .await;

        Ok(reading)
    }
}

#[async_trait]
impl Fetcher for ReserveFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Reserve
    }

    async fn fetch(&self, asset: &Asset, _scope: &Scope) -> Result<Vec<MetricSample>, FetchError> {
        let Some(por) = &asset.config.proof_of_reserve else {
            return Ok(vec![]);
        };
        let now = Utc::now();

        let (value, source) = match por {
            ProofOfReserve::ChainlinkPor {
                aggregators,
                token_addresses,
            } => {
                let Some(aggregator) = aggregators.first() else {
                    return Ok(vec![]);
                };
                let url = format!("https://por-aggregator.internal/feeds/{}", aggregator.address);
                let key = format!("chain:v1:por:{}", aggregator.address);
                let reading = self.fetch_reserve_reading(&key, &url).await?;
                if reading.circulating_supply <= 0.0 {
                    return Err(FetchError::terminal(
                        FetcherKind::Reserve,
                        "circulating_supply is zero for chainlink_por feed",
                    ));
                }
                let ratio = reading.reserve_amount / reading.circulating_supply;
                (
                    ratio,
                    json!({"mechanism": "chainlink_por", "token_addresses": token_addresses.len()}),
                )
            }
            ProofOfReserve::LiquidStaking { staked_token_address } => {
                let url = format!(
                    "https://staking-accounting.internal/tokens/{}",
                    staked_token_address
                );
                let key = format!("chain:v1:por_staking:{}", staked_token_address);
                let reading = self.fetch_reserve_reading(&key, &url).await?;
                if reading.circulating_supply <= 0.0 {
                    return Err(FetchError::terminal(
                        FetcherKind::Reserve,
                        "circulating_supply is zero for liquid_staking feed",
                    ));
                }
                let ratio = reading.reserve_amount / reading.circulating_supply;
                (ratio, json!({"mechanism": "liquid_staking"}))
            }
            ProofOfReserve::Fractional { backing_source } => {
                let key = format!("chain:v1:por_fractional:{backing_source}");
                let reading = self.fetch_reserve_reading(&key, backing_source).await?;
                if reading.circulating_supply <= 0.0 {
                    return Err(FetchError::terminal(
                        FetcherKind::Reserve,
                        "circulating_supply is zero for fractional backing source",
                    ));
                }
                let ratio = reading.reserve_amount / reading.circulating_supply;
                (ratio, json!({"mechanism": "fractional"}))
            }
            ProofOfReserve::NavBased { oracle } => {
                let key = format!("chain:v1:por_nav:{oracle}");
                let reading = self.fetch_reserve_reading(&key, oracle).await?;
                if reading.circulating_supply <= 0.0 {
                    return Err(FetchError::terminal(
                        FetcherKind::Reserve,
                        "circulating_supply is zero for nav_based oracle",
                    ));
                }
                let ratio = reading.reserve_amount / reading.circulating_supply;
                (ratio, json!({"mechanism": "nav_based"}))
            }
            ProofOfReserve::Scraper { url, parser_hint } => {
                let key = format!("chain:v1:por_scraper:{url}");
                if let Ok(Some(cached)) = self.cache.get_json::<ScraperReading>(&key).await {
                    self.metrics.observe_hit("fetch", "reserve_scraper");
                    (cached.por_ratio, json!({"mechanism": "scraper", "parser_hint": parser_hint}))
                } else {
                    self.metrics.observe_miss("fetch", "reserve_scraper");
                    let response = self
                        .http
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| FetchError::from_reqwest(FetcherKind::Reserve, &e))?;

                    if !response.status().is_success() {
                        let retriable =
                            response.status().is_server_error() || response.status().as_u16() == 429;
                        return Err(FetchError {
                            kind: FetcherKind::Reserve,
                            retriable,
                            cause: format!("scraper source returned {}", response.status()),
                        });
                    }

                    let reading = response
                        .json::<ScraperReading>()
                        .await
                        .map_err(|e| FetchError::from_reqwest(FetcherKind::Reserve, &e))?;

                    let _ = self
                        .cache
                        .set_json(&key, &reading, std::time::Duration::from_secs(300))
                        .await;

                    (reading.por_ratio, json!({"mechanism": "scraper", "parser_hint": parser_hint}))
                }
            }
        };

        Ok(vec![MetricSample {
            asset_symbol: asset.symbol.clone(),
            metric_name: MetricName::PorRatio,
            value,
            chain: None,
            context: source,
            triggered_at: now,
        }])
    }
}
