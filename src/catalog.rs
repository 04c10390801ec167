use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The closed set of metric names this core ever samples or scores.
///
/// Adding a metric here is additive; nothing downstream assumes the set is
/// exhaustive enumerated elsewhere (fetchers and scoring both key off this type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    PorRatio,
    OracleFreshnessMinutes,
    PegDeviationPct,
    PoolTvlUsd,
    UtilizationRate,
    Slippage100kPct,
    Slippage500kPct,
    Hhi,
    Gini,
    ClrPct,
    RlrPct,
    TotalSupply,
    Top10LpConcentrationPct,
    HolderHhi,
    Top10HolderConcentrationPct,
    CrossChainOracleLagMinutes,
    VolatilityAnnualizedPct,
    Var95Pct,
    Cvar95Pct,
    PriceDeviation365dMaxPct,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PorRatio => "por_ratio",
            Self::OracleFreshnessMinutes => "oracle_freshness_minutes",
            Self::PegDeviationPct => "peg_deviation_pct",
            Self::PoolTvlUsd => "pool_tvl_usd",
            Self::UtilizationRate => "utilization_rate",
            Self::Slippage100kPct => "slippage_100k_pct",
            Self::Slippage500kPct => "slippage_500k_pct",
            Self::Hhi => "hhi",
            Self::Gini => "gini",
            Self::ClrPct => "clr_pct",
            Self::RlrPct => "rlr_pct",
            Self::TotalSupply => "total_supply",
            Self::Top10LpConcentrationPct => "top10_lp_concentration_pct",
            Self::HolderHhi => "holder_hhi",
            Self::Top10HolderConcentrationPct => "top10_holder_concentration_pct",
            Self::CrossChainOracleLagMinutes => "cross_chain_oracle_lag_minutes",
            Self::VolatilityAnnualizedPct => "volatility_annualized_pct",
            Self::Var95Pct => "var95_pct",
            Self::Cvar95Pct => "cvar95_pct",
            Self::PriceDeviation365dMaxPct => "price_deviation_365d_max_pct",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "por_ratio" => Self::PorRatio,
            "oracle_freshness_minutes" => Self::OracleFreshnessMinutes,
            "peg_deviation_pct" => Self::PegDeviationPct,
            "pool_tvl_usd" => Self::PoolTvlUsd,
            "utilization_rate" => Self::UtilizationRate,
            "slippage_100k_pct" => Self::Slippage100kPct,
            "slippage_500k_pct" => Self::Slippage500kPct,
            "hhi" => Self::Hhi,
            "gini" => Self::Gini,
            "clr_pct" => Self::ClrPct,
            "rlr_pct" => Self::RlrPct,
            "total_supply" => Self::TotalSupply,
            "top10_lp_concentration_pct" => Self::Top10LpConcentrationPct,
            "holder_hhi" => Self::HolderHhi,
            "top10_holder_concentration_pct" => Self::Top10HolderConcentrationPct,
            "cross_chain_oracle_lag_minutes" => Self::CrossChainOracleLagMinutes,
            "volatility_annualized_pct" => Self::VolatilityAnnualizedPct,
            "var95_pct" => Self::Var95Pct,
            "cvar95_pct" => Self::Cvar95Pct,
            "price_deviation_365d_max_pct" => Self::PriceDeviation365dMaxPct,
            _ => return None,
        })
    }

    /// Higher values are safer for a "higher is better" metric; false means lower is safer.
    pub fn higher_is_better(&self) -> bool {
        matches!(
            self,
            Self::PorRatio | Self::PoolTvlUsd | Self::TotalSupply
        )
    }

    pub fn frequency_class(&self) -> FrequencyClass {
        match self {
            Self::PorRatio | Self::OracleFreshnessMinutes | Self::PegDeviationPct => {
                FrequencyClass::Critical
            }
            Self::PoolTvlUsd
            | Self::UtilizationRate
            | Self::Slippage100kPct
            | Self::Slippage500kPct => FrequencyClass::High,
            Self::Hhi
            | Self::Gini
            | Self::ClrPct
            | Self::RlrPct
            | Self::TotalSupply
            | Self::Top10LpConcentrationPct
            | Self::HolderHhi
            | Self::Top10HolderConcentrationPct
            | Self::CrossChainOracleLagMinutes => FrequencyClass::Medium,
            Self::VolatilityAnnualizedPct
            | Self::Var95Pct
            | Self::Cvar95Pct
            | Self::PriceDeviation365dMaxPct => FrequencyClass::Daily,
        }
    }
}

/// One of the four independent periodic drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyClass {
    Critical,
    High,
    Medium,
    Daily,
}

impl FrequencyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Daily => "daily",
        }
    }

    pub fn metrics(&self) -> Vec<MetricName> {
        use MetricName::*;
        match self {
            Self::Critical => vec![PorRatio, OracleFreshnessMinutes, PegDeviationPct],
            Self::High => vec![PoolTvlUsd, UtilizationRate, Slippage100kPct, Slippage500kPct],
            Self::Medium => vec![
                Hhi,
                Gini,
                ClrPct,
                RlrPct,
                TotalSupply,
                Top10LpConcentrationPct,
                HolderHhi,
                Top10HolderConcentrationPct,
                CrossChainOracleLagMinutes,
            ],
            Self::Daily => vec![
                VolatilityAnnualizedPct,
                Var95Pct,
                Cvar95Pct,
                PriceDeviation365dMaxPct,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Operator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// (scope: asset_symbol | global, metric_name, operator, threshold_value, severity, enabled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub id: uuid::Uuid,
    pub asset_symbol: Option<String>,
    pub metric: MetricName,
    pub operator: Operator,
    pub threshold_value: f64,
    pub severity: Severity,
    pub enabled: bool,
}

/// Immutable metric definitions plus the mutable (but atomically swappable)
/// threshold rule set. Loaded once at process start; `reload` replaces the
/// whole rule set in one assignment, matching the "read-mostly, atomic swap"
/// contract in spec §5.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<RwLock<Vec<ThresholdRule>>>,
}

impl Catalog {
    pub fn bootstrap() -> Self {
        Self {
            inner: Arc::new(RwLock::new(seed_rules())),
        }
    }

    pub async fn reload(&self, rules: Vec<ThresholdRule>) {
        let mut guard = self.inner.write().await;
        *guard = rules;
    }

    /// Per-asset overrides take precedence over global rules for the same
    /// (metric, operator, threshold_value) tuple.
    pub async fn rules_for(&self, asset_symbol: &str, metric: MetricName) -> Vec<ThresholdRule> {
        let guard = self.inner.read().await;
        let mut per_asset: Vec<ThresholdRule> = guard
            .iter()
            .filter(|r| {
                r.enabled && r.metric == metric && r.asset_symbol.as_deref() == Some(asset_symbol)
            })
            .cloned()
            .collect();

        let global: Vec<ThresholdRule> = guard
            .iter()
            .filter(|r| r.enabled && r.metric == metric && r.asset_symbol.is_none())
            .cloned()
            .collect();

        // A global rule is shadowed by a per-asset rule sharing (operator, value).
        for rule in global {
            let shadowed = per_asset
                .iter()
                .any(|o| o.operator == rule.operator && o.threshold_value == rule.threshold_value);
            if !shadowed {
                per_asset.push(rule);
            }
        }

        per_asset
    }

    pub async fn all(&self) -> Vec<ThresholdRule> {
        self.inner.read().await.clone()
    }
}

/// Built-in threshold rules from spec §6's seed table, global scope.
fn seed_rules() -> Vec<ThresholdRule> {
    use MetricName::*;
    use Operator::*;
    use Severity::*;

    let defs: &[(MetricName, Operator, f64, Severity)] = &[
        (PorRatio, Lt, 1.0, Critical),
        (PorRatio, Lt, 0.99, Critical),
        (OracleFreshnessMinutes, Gt, 30.0, Warning),
        (OracleFreshnessMinutes, Gt, 60.0, Critical),
        (PegDeviationPct, Gt, 2.0, Warning),
        (PegDeviationPct, Gt, 5.0, Critical),
        (UtilizationRate, Gt, 90.0, Warning),
        (UtilizationRate, Gt, 95.0, Critical),
        (PoolTvlUsd, Lt, 100_000.0, Warning),
        (Slippage100kPct, Gt, 2.0, Warning),
        (Slippage100kPct, Gt, 5.0, Critical),
        (Hhi, Gt, 4000.0, Warning),
        (Hhi, Gt, 6000.0, Critical),
        (Gini, Gt, 0.8, Warning),
        (Gini, Gt, 0.9, Critical),
        (ClrPct, Gt, 10.0, Warning),
        (ClrPct, Gt, 20.0, Critical),
        (RlrPct, Gt, 20.0, Warning),
        (RlrPct, Gt, 35.0, Critical),
    ];

    defs.iter()
        .map(|(metric, op, value, sev)| ThresholdRule {
            id: uuid::Uuid::new_v4(),
            asset_symbol: None,
            metric: *metric,
            operator: *op,
            threshold_value: *value,
            severity: *sev,
            enabled: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_asset_override_shadows_global() {
        let catalog = Catalog::bootstrap();
        let mut rules = catalog.all().await;
        rules.push(ThresholdRule {
            id: uuid::Uuid::new_v4(),
            asset_symbol: Some("WBTC".to_string()),
            metric: MetricName::PorRatio,
            operator: Operator::Lt,
            threshold_value: 1.0,
            severity: Severity::Warning,
            enabled: true,
        });
        catalog.reload(rules).await;

        let matched = catalog.rules_for("WBTC", MetricName::PorRatio).await;
        let critical_count = matched
            .iter()
            .filter(|r| r.severity == Severity::Critical && r.threshold_value == 1.0)
            .count();
        assert_eq!(critical_count, 0, "per-asset override should shadow the global rule");
        assert!(matched
            .iter()
            .any(|r| r.severity == Severity::Warning && r.asset_symbol.is_some()));
    }

    #[test]
    fn frequency_class_partitions_catalog() {
        let mut total = 0;
        for class in [
            FrequencyClass::Critical,
            FrequencyClass::High,
            FrequencyClass::Medium,
            FrequencyClass::Daily,
        ] {
            total += class.metrics().len();
        }
        assert_eq!(total, 20);
    }
}
