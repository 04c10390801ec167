//! C3: Metric Store (spec §4.3).

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{catalog::MetricName, db::Database};

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub asset_symbol: String,
    pub metric_name: MetricName,
    pub value: f64,
    pub chain: Option<String>,
    pub context: Value,
    pub triggered_at: DateTime<Utc>,
}

/// Append-only time series. `latest` returns nothing (no sentinel) when no
/// sample exists — callers must treat absence explicitly (spec §4.3).
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Total for valid input: never fails except on storage outage, which
    /// surfaces as `StorageUnavailable` (wrapped in the returned error).
    pub async fn append(&self, sample: &MetricSample) -> anyhow::Result<()> {
        self.db
            .metrics_append(
                &sample.asset_symbol,
                sample.metric_name,
                sample.value,
                sample.chain.as_deref(),
                &sample.context,
                sample.triggered_at,
            )
            .await
    }

    pub async fn latest(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
    ) -> anyhow::Result<Option<MetricSample>> {
        let row = self.db.metrics_latest(asset_symbol, metric_name).await?;
        Ok(row.map(Self::row_to_sample))
    }

    pub async fn range(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricSample>> {
        let rows = self
            .db
            .metrics_range(asset_symbol, metric_name, from, to)
            .await?;
        Ok(rows.into_iter().map(Self::row_to_sample).collect())
    }

    pub async fn latest_all(&self, asset_symbol: &str) -> anyhow::Result<Vec<MetricSample>> {
        let rows = self.db.metrics_latest_all(asset_symbol).await?;
        Ok(rows.into_iter().map(Self::row_to_sample).collect())
    }

    /// A consistent multi-metric snapshot: the max-timestamp sample <= cutoff
    /// per metric. Used exclusively by the scoring pipeline (spec §9 design
    /// note: "Ownership of the metric snapshot during scoring").
    pub async fn snapshot_at(
        &self,
        asset_symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricSample>> {
        let rows = self.db.metrics_snapshot_at(asset_symbol, cutoff).await?;
        Ok(rows.into_iter().map(Self::row_to_sample).collect())
    }

    fn row_to_sample(row: crate::db::MetricRow) -> MetricSample {
        MetricSample {
            asset_symbol: row.asset_symbol,
            metric_name: row.metric_name,
            value: row.value,
            chain: row.chain,
            context: row.metadata,
            triggered_at: row.recorded_at,
        }
    }
}

/// An immutable, in-memory view of the latest metrics for one asset at a
/// fixed cutoff — what the scoring pipeline actually consumes. Building this
/// is the only place `Store` is touched during scoring (spec §5: "Scoring is
/// pure-compute over a consistent in-memory snapshot ... and must not
/// suspend after the snapshot is taken").
///
/// Keyed by (metric, chain) rather than metric alone: lending and liquidity
/// fetchers emit one sample per market/pool sharing a metric name, tagged
/// with `chain` (spec §4.4); category scoring's TVL-weighted averaging
/// (§4.9) needs every market's sample, not just whichever one last
/// overwrote the others.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    by_metric: std::collections::HashMap<(MetricName, Option<String>), MetricSample>,
}

impl MetricSnapshot {
    pub fn from_samples(samples: Vec<MetricSample>) -> Self {
        let mut by_metric = std::collections::HashMap::new();
        for sample in samples {
            by_metric.insert((sample.metric_name, sample.chain.clone()), sample);
        }
        Self { by_metric }
    }

    /// The single sample for a metric with no chain tag (global-scope metrics
    /// such as `por_ratio`, `gini`, `volatility_annualized_pct`).
    pub fn get(&self, metric: MetricName) -> Option<&MetricSample> {
        self.by_metric.get(&(metric, None))
    }

    pub fn value(&self, metric: MetricName) -> Option<f64> {
        self.get(metric).map(|s| s.value)
    }

    /// Every sample recorded for `metric` across all chain tags — the
    /// per-market/per-pool view TVL-weighted averaging consumes.
    pub fn all_for(&self, metric: MetricName) -> Vec<&MetricSample> {
        self.by_metric
            .iter()
            .filter(|((m, _), _)| *m == metric)
            .map(|(_, sample)| sample)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(metric: MetricName, value: f64) -> MetricSample {
        MetricSample {
            asset_symbol: "WBTC".to_string(),
            metric_name: metric,
            value,
            chain: None,
            context: json!({}),
            triggered_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_keeps_one_sample_per_metric() {
        let snapshot = MetricSnapshot::from_samples(vec![
            sample(MetricName::PorRatio, 1.0),
            sample(MetricName::PegDeviationPct, 0.1),
        ]);
        assert_eq!(snapshot.value(MetricName::PorRatio), Some(1.0));
        assert_eq!(snapshot.value(MetricName::PegDeviationPct), Some(0.1));
        assert_eq!(snapshot.value(MetricName::Hhi), None);
    }
}
