//! The synchronous scoring pipeline (spec §4.9/§4.10, §9 design note
//! "Scoring is a separate synchronous pipeline"): Registry config + Store
//! snapshot -> Primary-Check Evaluator -> (if qualified) Category Scoring
//! Engine -> Circuit-Breaker Aggregator -> `ScoreArtifact`.
//!
//! Pure compute once the snapshot is taken: no `Store`/`Registry` calls
//! happen between `primary::evaluate` and `breakers::aggregate`, so a score
//! is always computed over one consistent view of the world.

pub mod anchors;
pub mod breakers;
pub mod categories;
pub mod primary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::MetricName,
    config_doc::AssetConfig,
    registry::Registry,
    scoring::{breakers::Grade, categories::CategoryResult, primary::PrimaryCheck},
    store::{MetricSnapshot, Store},
};

/// Spec §7: surfaced (logged, not returned as an error) when a sub-score's
/// backing metric is absent; the missing sub-score's weight is
/// redistributed proportionally within its category rather than the whole
/// scoring run failing.
#[derive(Debug, Clone)]
pub struct ScoringInputMissing {
    pub asset_symbol: String,
    pub sub_score: &'static str,
    pub reason: String,
}

impl std::fmt::Display for ScoringInputMissing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scoring input missing for {}.{}: {}",
            self.asset_symbol, self.sub_score, self.reason
        )
    }
}

impl std::error::Error for ScoringInputMissing {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreArtifact {
    pub asset_symbol: String,
    pub computed_at: DateTime<Utc>,
    pub qualified: bool,
    pub primary_checks: Vec<PrimaryCheck>,
    pub categories: Vec<CategoryResult>,
    pub raw_score: Option<f64>,
    pub final_score: Option<f64>,
    pub grade: Option<Grade>,
    pub triggered_breakers: Vec<breakers::TriggeredBreaker>,
}

/// Asset not found in the registry, or found but disabled — the caller
/// (handlers.rs) maps this to a 404.
#[derive(Debug, Clone)]
pub struct AssetNotFound(pub String);

impl std::fmt::Display for AssetNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "asset not found or disabled: {}", self.0)
    }
}

impl std::error::Error for AssetNotFound {}

/// Runs the full scoring pipeline for one asset: loads its config from the
/// registry, snapshots the metric store at `now`, runs primary checks, and
/// — when qualified — the category engine and breaker aggregator.
pub async fn score_asset(
    registry: &Registry,
    store: &Store,
    asset_symbol: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ScoreArtifact> {
    let asset = registry
        .get(asset_symbol)
        .await?
        .filter(|a| a.enabled)
        .ok_or_else(|| AssetNotFound(asset_symbol.to_string()))?;

    let samples = store.snapshot_at(asset_symbol, now).await?;
    let snapshot = MetricSnapshot::from_samples(samples);

    Ok(score_from_parts(asset_symbol, &asset.config, &snapshot, now))
}

/// The pure-compute half of the pipeline, split out from `score_asset` so
/// tests and the benchmark can drive it without a database.
pub fn score_from_parts(
    asset_symbol: &str,
    config: &AssetConfig,
    snapshot: &MetricSnapshot,
    now: DateTime<Utc>,
) -> ScoreArtifact {
    let primary_result = primary::evaluate(config.audit_data.as_ref(), now);

    if !primary_result.qualified {
        return ScoreArtifact {
            asset_symbol: asset_symbol.to_string(),
            computed_at: now,
            qualified: false,
            primary_checks: primary_result.checks,
            categories: vec![],
            raw_score: None,
            final_score: None,
            grade: None,
            triggered_breakers: vec![],
        };
    }

    let categories = categories::score_all(config, snapshot, now);
    let mut result = breakers::aggregate(&categories, config, &primary_result);

    if let Some(breaker) = breakers::reserve_undercollateralized(snapshot.value(MetricName::PorRatio)) {
        result.final_score = result.final_score.min(69.0);
        result.grade = Grade::for_score(result.final_score);
        result.triggered.insert(0, breaker);
    }

    ScoreArtifact {
        asset_symbol: asset_symbol.to_string(),
        computed_at: now,
        qualified: true,
        primary_checks: primary_result.checks,
        categories,
        raw_score: Some(result.raw_score),
        final_score: Some(result.final_score),
        grade: Some(result.grade),
        triggered_breakers: result.triggered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config_doc::{Audit, AuditData, CustodyModel, Governance},
        store::MetricSample,
    };
    use serde_json::json;

    fn sample(metric: MetricName, value: f64, chain: Option<&str>) -> MetricSample {
        MetricSample {
            asset_symbol: "WBTC".to_string(),
            metric_name: metric,
            value,
            chain: chain.map(str::to_string),
            context: json!({}),
            triggered_at: Utc::now(),
        }
    }

    fn qualified_config() -> AssetConfig {
        let mut config = AssetConfig::default();
        config.audit_data = Some(AuditData {
            audits: vec![Audit {
                auditor: "Trail of Bits".to_string(),
                date: Utc::now() - chrono::Duration::days(900),
                critical_issues_unresolved: 0,
                high_issues_unresolved: 0,
            }],
            deployment_date: Some(Utc::now() - chrono::Duration::days(900)),
            incidents: vec![],
        });
        config.governance = Some(Governance {
            roles: vec![],
            has_timelock: true,
            timelock_hours: 72,
            custody_model: CustodyModel::RegulatedInsured,
            has_blacklist: false,
            blacklist_control: crate::config_doc::BlacklistControl::None,
        });
        config
    }

    #[test]
    fn disqualified_primary_check_yields_no_score() {
        let config = AssetConfig::default();
        let snapshot = MetricSnapshot::default();
        let artifact = score_from_parts("WBTC", &config, &snapshot, Utc::now());
        assert!(!artifact.qualified);
        assert!(artifact.final_score.is_none());
        assert!(artifact.grade.is_none());
    }

    #[test]
    fn fully_qualified_high_quality_asset_scores_a() {
        let config = qualified_config();
        let snapshot = MetricSnapshot::from_samples(vec![
            sample(MetricName::PorRatio, 1.001, None),
            sample(MetricName::OracleFreshnessMinutes, 2.0, Some("ethereum")),
            sample(MetricName::CrossChainOracleLagMinutes, 1.0, Some("base")),
            sample(MetricName::PegDeviationPct, 0.05, None),
            sample(MetricName::VolatilityAnnualizedPct, 25.0, None),
            sample(MetricName::Var95Pct, 3.2, None),
            sample(MetricName::Slippage100kPct, 0.15, Some("ethereum")),
            sample(MetricName::Slippage500kPct, 0.4, Some("ethereum")),
            sample(MetricName::Hhi, 1200.0, Some("ethereum")),
            sample(MetricName::UtilizationRate, 55.0, Some("ethereum")),
            sample(MetricName::ClrPct, 3.0, Some("ethereum")),
            sample(MetricName::RlrPct, 4.0, Some("ethereum")),
        ]);
        let artifact = score_from_parts("WBTC", &config, &snapshot, Utc::now());
        assert!(artifact.qualified);
        let final_score = artifact.final_score.unwrap();
        assert!(final_score >= 85.0, "expected grade A territory, got {final_score}");
        assert!(artifact.triggered_breakers.is_empty());
        assert_eq!(artifact.grade, Some(Grade::A));
    }

    #[test]
    fn undercollateralized_reserve_caps_at_69() {
        let config = qualified_config();
        let mut samples = vec![
            sample(MetricName::PorRatio, 0.97, None),
            sample(MetricName::OracleFreshnessMinutes, 2.0, Some("ethereum")),
            sample(MetricName::CrossChainOracleLagMinutes, 1.0, Some("base")),
            sample(MetricName::PegDeviationPct, 0.05, None),
            sample(MetricName::VolatilityAnnualizedPct, 25.0, None),
            sample(MetricName::Var95Pct, 3.2, None),
        ];
        samples.extend([
            sample(MetricName::Slippage100kPct, 0.15, Some("ethereum")),
            sample(MetricName::Slippage500kPct, 0.4, Some("ethereum")),
            sample(MetricName::Hhi, 1200.0, Some("ethereum")),
            sample(MetricName::UtilizationRate, 55.0, Some("ethereum")),
            sample(MetricName::ClrPct, 3.0, Some("ethereum")),
            sample(MetricName::RlrPct, 4.0, Some("ethereum")),
        ]);
        let snapshot = MetricSnapshot::from_samples(samples);
        let artifact = score_from_parts("WBTC", &config, &snapshot, Utc::now());
        assert_eq!(artifact.final_score, Some(69.0));
        assert_eq!(artifact.grade, Some(Grade::C));
        assert!(artifact
            .triggered_breakers
            .iter()
            .any(|b| b.name == "reserve_undercollateralized"));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let config = qualified_config();
        let snapshot = MetricSnapshot::from_samples(vec![sample(MetricName::PorRatio, 1.001, None)]);
        let now = Utc::now();
        let first = score_from_parts("WBTC", &config, &snapshot, now);
        let second = score_from_parts("WBTC", &config, &snapshot, now);
        assert_eq!(first.final_score, second.final_score);
        assert_eq!(first.grade, second.grade);
    }
}
