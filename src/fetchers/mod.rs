//! C4: Fetchers (spec §4.4).
//!
//! A fetcher is identified by a `FetcherKind`; each kind exposes `fetch`,
//! returning either all the samples it produces for one work unit, or none —
//! a single invocation never partially persists (the dispatcher is the one
//! that writes to the store, one call at a time, after `fetch` returns).
//!
//! Routing from work unit to implementation is a `match` on `FetcherKind`
//! (spec §9: "Fetcher pluggability without dynamic dispatch at runtime
//! boundaries") — `Box<dyn Fetcher>` is used only to hold the heterogeneous
//! set of fetcher instances in the dispatcher's table, not as the dispatch
//! mechanism itself.

mod distribution;
mod lending;
mod liquidity;
mod market;
mod oracle;
mod reserve;

pub use distribution::DistributionFetcher;
pub use lending::LendingFetcher;
pub use liquidity::LiquidityFetcher;
pub use market::MarketFetcher;
pub use oracle::OracleFetcher;
pub use reserve::ReserveFetcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{registry::Asset, store::MetricSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherKind {
    Oracle,
    Reserve,
    Liquidity,
    Lending,
    Distribution,
    Market,
}

impl FetcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Reserve => "reserve",
            Self::Liquidity => "liquidity",
            Self::Lending => "lending",
            Self::Distribution => "distribution",
            Self::Market => "market",
        }
    }
}

/// Narrows a fetch to one sub-target: one lending market, one DEX pool, or
/// the whole asset when a kind has no sub-targets to split on. The
/// dispatcher constructs one work unit per `Scope` a kind's asset config
/// implies, so a single failing market or pool never discards the samples
/// already computed for its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Whole,
    LendingMarket(usize),
    DexPool(usize),
}

/// `{kind, retriable, cause}` — contained within a single work unit. Only
/// `retriable` failures (timeout, 5xx, RPC ratelimit) are retried by the
/// dispatcher; terminal failures (4xx, schema mismatch) are recorded once.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub kind: FetcherKind,
    pub retriable: bool,
    pub cause: String,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetch error ({}, retriable={}): {}",
            self.kind.as_str(),
            self.retriable,
            self.cause
        )
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn from_reqwest(kind: FetcherKind, err: &reqwest::Error) -> Self {
        let retriable = err.is_timeout() || err.is_connect() || status_is_retriable(err);
        Self {
            kind,
            retriable,
            cause: err.to_string(),
        }
    }

    pub fn terminal(kind: FetcherKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: false,
            cause: cause.into(),
        }
    }

    pub fn retriable(kind: FetcherKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: true,
            cause: cause.into(),
        }
    }
}

fn status_is_retriable(err: &reqwest::Error) -> bool {
    match err.status() {
        Some(status) => status.is_server_error() || status.as_u16() == 429,
        None => false,
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn kind(&self) -> FetcherKind;

    /// Must tolerate missing sub-sections of the asset config: if a required
    /// descriptor is absent, returns `Ok(vec![])` rather than an error.
    async fn fetch(&self, asset: &Asset, scope: &Scope) -> Result<Vec<MetricSample>, FetchError>;
}
