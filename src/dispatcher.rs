//! C5: Dispatcher (spec §4.5).
//!
//! One tick per frequency class, driven externally by `main`'s interval
//! loops. A tick fans a bounded worker pool out over every enabled asset
//! crossed with every fetcher kind relevant to that class, retries
//! retriable failures with jittered exponential backoff, and isolates
//! failures per work unit: one asset/kind combination failing out never
//! aborts the rest of the tick (spec §5 "tick isolation").

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};
use tracing::{error, info, warn};

use crate::{
    alerts::AlertEngine,
    catalog::FrequencyClass,
    fetchers::{Fetcher, FetcherKind, Scope},
    metrics::Metrics,
    registry::{Asset, Registry},
    store::Store,
};

const DEFAULT_PARALLELISM: usize = 16;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(8);
const MAX_ATTEMPTS: u32 = 3;
const CRITICAL_UNIT_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_UNIT_DEADLINE: Duration = Duration::from_secs(60);
const TICK_DEADLINE_MULTIPLIER: u32 = 5;

/// Maps a frequency class to the fetcher kinds that produce at least one
/// metric in that class (spec §3's frequency-class table, inverted). A kind
/// can appear under more than one class — `Liquidity` emits both `high`-class
/// depth metrics and `medium`-class concentration metrics in one call — so
/// `run_work_unit` filters the fetched samples down to the metrics whose own
/// `frequency_class()` matches the class driving this tick before writing
/// any of them, rather than persisting the whole batch under every class
/// that happens to invoke the kind.
fn fetcher_kinds_for(class: FrequencyClass) -> &'static [FetcherKind] {
    use FetcherKind::*;
    match class {
        FrequencyClass::Critical => &[Reserve, Oracle, Market],
        FrequencyClass::High => &[Liquidity, Lending],
        FrequencyClass::Medium => &[Liquidity, Distribution, Lending, Oracle],
        FrequencyClass::Daily => &[Market],
    }
}

/// One work unit per sub-target a kind's asset config implies, so a single
/// failing market or pool isolates to just that unit instead of discarding
/// every sample already computed for its siblings (spec §4.4 scope
/// isolation). Kinds with no sub-target concept always get one `Scope::Whole`
/// unit.
fn scopes_for(kind: FetcherKind, asset: &Asset) -> Vec<Scope> {
    match kind {
        FetcherKind::Lending => {
            let n = asset.config.lending_configs.len();
            if n == 0 {
                vec![Scope::Whole]
            } else {
                (0..n).map(Scope::LendingMarket).collect()
            }
        }
        FetcherKind::Liquidity => {
            let n = asset.config.dex_pools.len();
            if n == 0 {
                vec![Scope::Whole]
            } else {
                (0..n).map(Scope::DexPool).collect()
            }
        }
        FetcherKind::Oracle | FetcherKind::Reserve | FetcherKind::Market | FetcherKind::Distribution => {
            vec![Scope::Whole]
        }
    }
}

fn unit_deadline(class: FrequencyClass) -> Duration {
    match class {
        FrequencyClass::Critical => CRITICAL_UNIT_DEADLINE,
        _ => DEFAULT_UNIT_DEADLINE,
    }
}

/// Holds one boxed `Fetcher` per kind. Routing from a work unit to its
/// implementation is a `match` on `FetcherKind` (spec §9's no-dynamic-dispatch
/// design note) — the `Box<dyn Fetcher>` only holds the heterogeneous set,
/// it never participates in the dispatch decision itself.
pub struct FetcherTable {
    pub oracle: Box<dyn Fetcher>,
    pub reserve: Box<dyn Fetcher>,
    pub liquidity: Box<dyn Fetcher>,
    pub lending: Box<dyn Fetcher>,
    pub distribution: Box<dyn Fetcher>,
    pub market: Box<dyn Fetcher>,
}

impl FetcherTable {
    fn get(&self, kind: FetcherKind) -> &dyn Fetcher {
        match kind {
            FetcherKind::Oracle => self.oracle.as_ref(),
            FetcherKind::Reserve => self.reserve.as_ref(),
            FetcherKind::Liquidity => self.liquidity.as_ref(),
            FetcherKind::Lending => self.lending.as_ref(),
            FetcherKind::Distribution => self.distribution.as_ref(),
            FetcherKind::Market => self.market.as_ref(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TickOutcome {
    pub units_total: usize,
    pub units_failed: usize,
    pub samples_written: usize,
}

impl TickOutcome {
    pub fn complete(&self) -> bool {
        self.units_failed == 0
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    store: Store,
    fetchers: Arc<FetcherTable>,
    metrics: Metrics,
    alert_engine: AlertEngine,
    parallelism: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Registry,
        store: Store,
        fetchers: FetcherTable,
        metrics: Metrics,
        alert_engine: AlertEngine,
    ) -> Self {
        Self {
            registry,
            store,
            fetchers: Arc::new(fetchers),
            metrics,
            alert_engine,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Runs one tick for `class`: snapshots the enabled-asset registry
    /// (copy-on-write — assets registered mid-tick are simply not in this
    /// tick's set, spec §9), fans out one work unit per (asset, kind, scope)
    /// sub-target, and enforces an outer tick deadline on top of each unit's
    /// own.
    pub async fn tick(&self, class: FrequencyClass) -> anyhow::Result<TickOutcome> {
        let assets = self.registry.list_enabled().await?;
        let kinds = fetcher_kinds_for(class);
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let deadline = unit_deadline(class);
        let tick_deadline = deadline * TICK_DEADLINE_MULTIPLIER;

        let mut joinset = JoinSet::new();
        let mut units_total = 0usize;

        for asset in assets {
            for &kind in kinds {
                for scope in scopes_for(kind, &asset) {
                    units_total += 1;
                    let semaphore = semaphore.clone();
                    let fetchers = self.fetchers.clone();
                    let store = self.store.clone();
                    let metrics = self.metrics.clone();
                    let alert_engine = self.alert_engine.clone();
                    let asset = asset.clone();

                    joinset.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .expect("semaphore never closed");
                        run_work_unit(
                            &fetchers,
                            &store,
                            &alert_engine,
                            &metrics,
                            asset,
                            kind,
                            class,
                            scope,
                            deadline,
                        )
                        .await
                    });
                }
            }
        }

        let mut outcome = TickOutcome {
            units_total,
            ..Default::default()
        };

        let drained = timeout(tick_deadline, async {
            while let Some(result) = joinset.join_next().await {
                match result {
                    Ok(Ok(samples_written)) => outcome.samples_written += samples_written,
                    Ok(Err(_)) => outcome.units_failed += 1,
                    Err(join_err) => {
                        error!(class = class.as_str(), error = %join_err, "work unit task panicked");
                        outcome.units_failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            let aborted = joinset.len();
            warn!(
                class = class.as_str(),
                aborted, "tick exceeded outer deadline, aborting remaining work units"
            );
            joinset.abort_all();
            outcome.units_failed += aborted;
        }

        if !outcome.complete() {
            self.metrics.observe_tick_incomplete(class.as_str());
            warn!(
                class = class.as_str(),
                units_total = outcome.units_total,
                units_failed = outcome.units_failed,
                "tick completed with failures"
            );
        } else {
            info!(
                class = class.as_str(),
                units_total = outcome.units_total,
                samples_written = outcome.samples_written,
                "tick completed"
            );
        }

        Ok(outcome)
    }
}

/// Fetch-retry-persist-alert for one (asset, kind, scope) work unit.
/// Retriable `FetchError`s are retried with jittered exponential backoff up
/// to `MAX_ATTEMPTS`; terminal errors and exhausted retries both count as a
/// failed unit. Fetched samples are filtered to the metrics whose declared
/// frequency class matches `class` before anything is written — a kind whose
/// output spans more than one class (e.g. `Liquidity`'s high-class depth
/// metrics alongside its medium-class concentration metrics) only persists
/// the slice this tick owns. Every successfully persisted sample is then run
/// through the alert engine as a side effect of the write (spec §4 data-flow:
/// "Metric Store (+ Alert Engine side-effect)") — an alert-evaluation failure
/// is logged but does not count the unit as failed, since the sample itself
/// was durably written. A storage-append failure, in contrast, aborts the
/// rest of the unit and fails it outright (spec §7: a tick that cannot write
/// aborts its remaining writes and surfaces as an incomplete tick).
#[allow(clippy::too_many_arguments)]
async fn run_work_unit(
    fetchers: &FetcherTable,
    store: &Store,
    alert_engine: &AlertEngine,
    metrics: &Metrics,
    asset: Asset,
    kind: FetcherKind,
    class: FrequencyClass,
    scope: Scope,
    deadline: Duration,
) -> anyhow::Result<usize> {
    let fetcher = fetchers.get(kind);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let fetch_result = timeout(deadline, fetcher.fetch(&asset, &scope)).await;

        let samples = match fetch_result {
            Ok(Ok(samples)) => samples,
            Ok(Err(err)) if err.retriable && attempt < MAX_ATTEMPTS => {
                metrics.observe_fetch_attempt(kind.as_str(), "retry");
                backoff_sleep(attempt).await;
                continue;
            }
            Ok(Err(err)) => {
                metrics.observe_fetch_attempt(kind.as_str(), "failure");
                return Err(anyhow::anyhow!(err));
            }
            Err(_) => {
                if attempt < MAX_ATTEMPTS {
                    metrics.observe_fetch_attempt(kind.as_str(), "timeout_retry");
                    backoff_sleep(attempt).await;
                    continue;
                }
                metrics.observe_fetch_attempt(kind.as_str(), "timeout");
                return Err(anyhow::anyhow!(
                    "fetch for {} timed out after {} attempts",
                    kind.as_str(),
                    attempt
                ));
            }
        };

        metrics.observe_fetch_attempt(kind.as_str(), "success");

        let mut written = 0;
        for sample in samples.iter().filter(|s| s.metric_name.frequency_class() == class) {
            store.append(sample).await.map_err(|e| {
                error!(asset = %asset.symbol, kind = kind.as_str(), error = %e, "store append failed mid-unit, aborting unit");
                e
            })?;
            written += 1;
            if let Err(e) = alert_engine
                .evaluate_sample(
                    &asset.symbol,
                    &asset.name,
                    sample.metric_name,
                    sample.value,
                    sample.chain.as_deref(),
                    sample.triggered_at,
                )
                .await
            {
                error!(asset = %asset.symbol, kind = kind.as_str(), error = %e, "alert evaluation failed for sample");
            }
        }
        return Ok(written);
    }
}

async fn backoff_sleep(attempt: u32) {
    let exp = RETRY_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    let capped = exp.min(RETRY_CAP);
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered_ms = (capped.as_millis() as f64) * (1.0 + jitter_frac);
    tokio::time::sleep(Duration::from_millis(jittered_ms.max(0.0) as u64)).await;
}
