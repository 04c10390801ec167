//! C9: Category Scoring Engine (spec §4.9).
//!
//! Six categories, each a weighted sum of sub-scores in [0,100]. Every
//! sub-score mapping from a raw metric to a score is either a piecewise-
//! linear interpolation over the anchor tables in `anchors.rs` or one of
//! the closed-form rules spec §4.9 gives directly (`audit_score`,
//! `incident_history`, `admin_key_control`, `peg_deviation`).
//!
//! A sub-score that cannot be computed (no audit data, no governance
//! section, a metric never sampled) is recorded as `score: None` in its
//! trace rather than defaulting to a number: spec §7's `ScoringInputMissing`
//! redistributes that sub-score's weight proportionally across the
//! category's remaining sub-scores instead of silently substituting a
//! value.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::MetricName,
    config_doc::{AssetConfig, AuthorityKind, BlacklistControl, CustodyModel},
    scoring::anchors,
    store::MetricSnapshot,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScoreTrace {
    pub name: &'static str,
    pub weight: f64,
    pub score: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResult {
    pub name: &'static str,
    pub weight: f64,
    pub score: f64,
    pub sub_scores: Vec<SubScoreTrace>,
}

/// Weighted average over whatever sub-scores are present; a present
/// sub-score's weight is implicitly boosted by the absence of the others,
/// which is exactly "redistributed proportionally within its category"
/// (spec §7) since a plain weighted mean already divides by the weight of
/// only the terms summed. An entirely-missing category scores 0 with a
/// note — missing data is treated as the riskier assumption, not a neutral
/// one.
fn weighted_average(sub_scores: &[SubScoreTrace]) -> f64 {
    let mut total_weight = 0.0;
    let mut total = 0.0;
    for sub in sub_scores {
        if let Some(score) = sub.score {
            total_weight += sub.weight;
            total += sub.weight * score;
        }
    }
    if total_weight <= 0.0 {
        0.0
    } else {
        total / total_weight
    }
}

fn category(name: &'static str, weight: f64, sub_scores: Vec<SubScoreTrace>) -> CategoryResult {
    let score = weighted_average(&sub_scores);
    CategoryResult {
        name,
        weight,
        score,
        sub_scores,
    }
}

fn present(name: &'static str, weight: f64, score: f64) -> SubScoreTrace {
    SubScoreTrace {
        name,
        weight,
        score: Some(score),
        note: None,
    }
}

fn missing(name: &'static str, weight: f64, reason: &str) -> SubScoreTrace {
    SubScoreTrace {
        name,
        weight,
        score: None,
        note: Some(reason.to_string()),
    }
}

/// Single scalar metric with no chain split (market/distribution metrics).
fn scalar(snapshot: &MetricSnapshot, metric: MetricName) -> Option<f64> {
    snapshot
        .get(metric)
        .map(|s| s.value)
        .or_else(|| snapshot.all_for(metric).first().map(|s| s.value))
}

/// Worst (highest) reading across every chain-tagged sample for a metric —
/// used for oracle freshness and cross-chain lag, where risk scoring cares
/// about the slowest feed, not the average one.
fn worst(snapshot: &MetricSnapshot, metric: MetricName) -> Option<f64> {
    snapshot
        .all_for(metric)
        .iter()
        .map(|s| s.value)
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

/// TVL-weighted average across markets/pools for a metric whose samples
/// each carry their own weight under `weight_field` in `context` (spec
/// §4.9: "TVL-weighted averaging applies to utilization_rate, clr_pct,
/// rlr_pct across lending markets"). Generalized here to liquidity pools
/// too, using each pool's own `pool_tvl_usd` sample as the weight, since
/// `dex_pools` is a list exactly like `lending_configs` and an unweighted
/// average across pools of wildly different depth would be misleading.
fn tvl_weighted(snapshot: &MetricSnapshot, metric: MetricName, weight_field: &str) -> Option<f64> {
    let samples = snapshot.all_for(metric);
    if samples.is_empty() {
        return None;
    }
    let mut total_weight = 0.0;
    let mut total = 0.0;
    for s in &samples {
        let weight = s
            .context
            .get(weight_field)
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0)
            .max(0.0);
        total_weight += weight;
        total += weight * s.value;
    }
    if total_weight <= 0.0 {
        Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
    } else {
        Some(total / total_weight)
    }
}

/// TVL-weighted average for a liquidity metric, pairing each sample with
/// the `pool_tvl_usd` sample sharing its chain tag as the weight (liquidity
/// samples don't carry their own TVL in context the way lending samples
/// carry `total_supplied_usd`).
fn liquidity_tvl_weighted(snapshot: &MetricSnapshot, metric: MetricName) -> Option<f64> {
    let tvl_by_chain: HashMap<Option<String>, f64> = snapshot
        .all_for(MetricName::PoolTvlUsd)
        .iter()
        .map(|s| (s.chain.clone(), s.value))
        .collect();

    let samples = snapshot.all_for(metric);
    if samples.is_empty() {
        return None;
    }
    let mut total_weight = 0.0;
    let mut total = 0.0;
    for s in &samples {
        let weight = tvl_by_chain.get(&s.chain).copied().unwrap_or(1.0).max(0.0);
        total_weight += weight;
        total += weight * s.value;
    }
    if total_weight <= 0.0 {
        Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
    } else {
        Some(total / total_weight)
    }
}

fn months_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_days() as f64 / 30.4375
}

/// Smart Contract category (weight 10%): audit_score(40), code_maturity(30),
/// incident_history(30).
pub fn smart_contract(config: &AssetConfig, now: DateTime<Utc>) -> CategoryResult {
    let audit_data = config.audit_data.as_ref();

    let audit_score = audit_data.map(|data| {
        if data.audits.is_empty() {
            return 20.0_f64.clamp(0.0, 100.0);
        }
        let mut score = 80.0;

        let has_unresolved_critical = data.audits.iter().any(|a| a.critical_issues_unresolved > 0);
        let has_unresolved_high = data.audits.iter().any(|a| a.high_issues_unresolved > 0);
        if has_unresolved_critical {
            score *= 0.3;
        }
        if has_unresolved_high {
            score *= 0.7;
        }

        if let Some(most_recent) = data.audits.iter().map(|a| a.date).max() {
            let months = months_between(most_recent, now);
            if months > 24.0 {
                score *= 0.6;
            } else if months > 12.0 {
                score *= 0.8;
            }
        }

        let has_top_tier = data
            .audits
            .iter()
            .any(|a| crate::config_doc::TOP_TIER_AUDITORS.contains(&a.auditor.as_str()));
        if has_top_tier {
            score *= 1.1;
        }

        score.clamp(0.0, 100.0)
    });

    let code_maturity = audit_data.and_then(|d| d.deployment_date).map(|deployed| {
        let days = (now - deployed).num_days() as f64;
        anchors::interpolate(days.max(0.0), anchors::CODE_MATURITY_DAYS)
    });

    let incident_history = audit_data.map(|data| {
        let mut score = 100.0;
        for incident in &data.incidents {
            if incident.funds_lost_usd > 0.0 {
                score -= 30.0 + incident.funds_lost_pct_of_tvl.min(30.0);
            } else {
                score -= 15.0;
            }
        }
        score.max(0.0)
    });

    category(
        "smart_contract",
        10.0,
        vec![
            audit_score
                .map(|s| present("audit_score", 40.0, s))
                .unwrap_or_else(|| missing("audit_score", 40.0, "no audit_data section")),
            code_maturity
                .map(|s| present("code_maturity", 30.0, s))
                .unwrap_or_else(|| missing("code_maturity", 30.0, "no deployment_date on file")),
            incident_history
                .map(|s| present("incident_history", 30.0, s))
                .unwrap_or_else(|| missing("incident_history", 30.0, "no audit_data section")),
        ],
    )
}

fn dao_voting_p(role: &crate::config_doc::GovernanceRole) -> f64 {
    let mut dao_score: f64 = 50.0;
    if let Some(safeguards) = &role.dao_safeguards {
        if safeguards.has_veto_power {
            dao_score += 15.0;
        }
        if safeguards.has_dual_governance {
            dao_score += 10.0;
        }
        if safeguards.quorum_pct >= 10.0 {
            dao_score += 5.0;
        }
    }
    let dao_score = dao_score.min(80.0);
    (100.0 - dao_score) / 100.0 * 10.0
}

/// Counterparty category (weight 25%): admin_key_control(40),
/// custody_model(30), timelock_presence(15), blacklist(15).
pub fn counterparty(config: &AssetConfig) -> CategoryResult {
    let governance = config.governance.as_ref();

    let admin_key_control = governance.map(|gov| {
        let mut score = 100.0;
        for role in &gov.roles {
            let p = match role.authority_kind {
                AuthorityKind::Eoa => 15.0,
                AuthorityKind::Multisig => {
                    let threshold = role.threshold.unwrap_or(0) as f64;
                    let signers = role.signer_count.unwrap_or(0) as f64;
                    if signers > 0.0 {
                        (1.0 - threshold / signers) * 10.0
                    } else {
                        10.0
                    }
                }
                AuthorityKind::DaoVoting => dao_voting_p(role),
                AuthorityKind::ContractUnknown => 7.0,
            };
            score -= role.role_weight as f64 * p;
        }
        if !gov.has_timelock {
            score *= 0.85;
        }
        score.clamp(0.0, 100.0)
    });

    let custody_model = governance.map(|gov| match gov.custody_model {
        CustodyModel::Decentralized => 95.0,
        CustodyModel::RegulatedInsured => 85.0,
        CustodyModel::Regulated => 65.0,
        CustodyModel::Unregulated => 30.0,
        CustodyModel::Unknown => 10.0,
    });

    let timelock_presence = governance.map(|gov| {
        if gov.has_timelock {
            anchors::interpolate(gov.timelock_hours as f64, anchors::TIMELOCK_HOURS)
        } else {
            0.0
        }
    });

    let blacklist = governance.map(|gov| {
        if !gov.has_blacklist {
            return 100.0;
        }
        match gov.blacklist_control {
            BlacklistControl::None => 100.0,
            BlacklistControl::Governance => 75.0,
            BlacklistControl::Multisig => 60.0,
            BlacklistControl::SingleEntity => 30.0,
        }
    });

    category(
        "counterparty",
        25.0,
        vec![
            admin_key_control
                .map(|s| present("admin_key_control", 40.0, s))
                .unwrap_or_else(|| missing("admin_key_control", 40.0, "no governance section")),
            custody_model
                .map(|s| present("custody_model", 30.0, s))
                .unwrap_or_else(|| missing("custody_model", 30.0, "no governance section")),
            timelock_presence
                .map(|s| present("timelock_presence", 15.0, s))
                .unwrap_or_else(|| missing("timelock_presence", 15.0, "no governance section")),
            blacklist
                .map(|s| present("blacklist", 15.0, s))
                .unwrap_or_else(|| missing("blacklist", 15.0, "no governance section")),
        ],
    )
}

/// Market category (weight 15%): peg_deviation(40), volatility(30), var95(30).
pub fn market(snapshot: &MetricSnapshot) -> CategoryResult {
    let peg_deviation = scalar(snapshot, MetricName::PegDeviationPct)
        .map(|v| anchors::peg_deviation_score(v.abs()));
    let volatility = scalar(snapshot, MetricName::VolatilityAnnualizedPct)
        .map(|v| anchors::interpolate(v, anchors::VOLATILITY));
    let var95 = scalar(snapshot, MetricName::Var95Pct).map(|v| anchors::interpolate(v, anchors::VAR95));

    category(
        "market",
        15.0,
        vec![
            peg_deviation
                .map(|s| present("peg_deviation", 40.0, s))
                .unwrap_or_else(|| missing("peg_deviation", 40.0, "no price_risk metrics sampled")),
            volatility
                .map(|s| present("volatility", 30.0, s))
                .unwrap_or_else(|| missing("volatility", 30.0, "no price history sampled")),
            var95
                .map(|s| present("var95", 30.0, s))
                .unwrap_or_else(|| missing("var95", 30.0, "no price history sampled")),
        ],
    )
}

/// Liquidity category (weight 15%): slippage_100k(40), slippage_500k(30),
/// hhi(30) — each TVL-weighted across the asset's dex pools.
pub fn liquidity(snapshot: &MetricSnapshot) -> CategoryResult {
    let slippage_100k = liquidity_tvl_weighted(snapshot, MetricName::Slippage100kPct)
        .map(|v| anchors::interpolate(v, anchors::SLIPPAGE_100K));
    let slippage_500k = liquidity_tvl_weighted(snapshot, MetricName::Slippage500kPct)
        .map(|v| anchors::interpolate(v, anchors::SLIPPAGE_500K));
    let hhi = liquidity_tvl_weighted(snapshot, MetricName::Hhi)
        .map(|v| anchors::interpolate(v, anchors::LIQUIDITY_HHI));

    category(
        "liquidity",
        15.0,
        vec![
            slippage_100k
                .map(|s| present("slippage_100k", 40.0, s))
                .unwrap_or_else(|| missing("slippage_100k", 40.0, "no dex pools sampled")),
            slippage_500k
                .map(|s| present("slippage_500k", 30.0, s))
                .unwrap_or_else(|| missing("slippage_500k", 30.0, "no dex pools sampled")),
            hhi.map(|s| present("hhi", 30.0, s))
                .unwrap_or_else(|| missing("hhi", 30.0, "no dex pools sampled")),
        ],
    )
}

/// Collateral category (weight 10%): cascade_liquidation(40),
/// recursive_lending(35), utilization(25) — each TVL-weighted across the
/// asset's lending markets.
pub fn collateral(snapshot: &MetricSnapshot) -> CategoryResult {
    let clr = tvl_weighted(snapshot, MetricName::ClrPct, "total_supplied_usd")
        .map(|v| anchors::interpolate(v, anchors::CASCADE_LIQUIDATION));
    let rlr = tvl_weighted(snapshot, MetricName::RlrPct, "total_supplied_usd")
        .map(|v| anchors::interpolate(v, anchors::RECURSIVE_LENDING));
    let utilization = tvl_weighted(snapshot, MetricName::UtilizationRate, "total_supplied_usd")
        .map(|v| anchors::interpolate(v, anchors::UTILIZATION));

    category(
        "collateral",
        10.0,
        vec![
            clr.map(|s| present("cascade_liquidation", 40.0, s))
                .unwrap_or_else(|| missing("cascade_liquidation", 40.0, "no lending markets sampled")),
            rlr.map(|s| present("recursive_lending", 35.0, s))
                .unwrap_or_else(|| missing("recursive_lending", 35.0, "no lending markets sampled")),
            utilization
                .map(|s| present("utilization", 25.0, s))
                .unwrap_or_else(|| missing("utilization", 25.0, "no lending markets sampled")),
        ],
    )
}

/// Reserve & Oracle category (weight 25%): proof_of_reserves(50),
/// oracle_freshness(25), cross_chain_lag(25).
pub fn reserve_and_oracle(snapshot: &MetricSnapshot) -> CategoryResult {
    let por = scalar(snapshot, MetricName::PorRatio)
        .map(|v| anchors::interpolate(v, anchors::PROOF_OF_RESERVES));
    let oracle_freshness = worst(snapshot, MetricName::OracleFreshnessMinutes)
        .map(|v| anchors::interpolate(v, anchors::ORACLE_FRESHNESS));
    let cross_chain_lag = worst(snapshot, MetricName::CrossChainOracleLagMinutes)
        .map(|v| anchors::interpolate(v, anchors::CROSS_CHAIN_LAG));

    category(
        "reserve_and_oracle",
        25.0,
        vec![
            por.map(|s| present("proof_of_reserves", 50.0, s))
                .unwrap_or_else(|| missing("proof_of_reserves", 50.0, "no por_ratio sampled")),
            oracle_freshness
                .map(|s| present("oracle_freshness", 25.0, s))
                .unwrap_or_else(|| missing("oracle_freshness", 25.0, "no price feeds configured")),
            cross_chain_lag
                .map(|s| present("cross_chain_lag", 25.0, s))
                .unwrap_or_else(|| missing("cross_chain_lag", 25.0, "no cross-chain feeds configured")),
        ],
    )
}

/// Runs all six categories against one asset's config and metric snapshot.
pub fn score_all(config: &AssetConfig, snapshot: &MetricSnapshot, now: DateTime<Utc>) -> Vec<CategoryResult> {
    vec![
        smart_contract(config, now),
        counterparty(config),
        market(snapshot),
        liquidity(snapshot),
        collateral(snapshot),
        reserve_and_oracle(snapshot),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetricSample;
    use serde_json::json;

    fn sample(metric: MetricName, value: f64, chain: Option<&str>, context: serde_json::Value) -> MetricSample {
        MetricSample {
            asset_symbol: "WBTC".to_string(),
            metric_name: metric,
            value,
            chain: chain.map(str::to_string),
            context,
            triggered_at: Utc::now(),
        }
    }

    #[test]
    fn reserve_and_oracle_rewards_full_backing_and_fresh_feeds() {
        let snapshot = MetricSnapshot::from_samples(vec![
            sample(MetricName::PorRatio, 1.001, None, json!({})),
            sample(MetricName::OracleFreshnessMinutes, 2.0, Some("ethereum"), json!({})),
            sample(MetricName::CrossChainOracleLagMinutes, 1.0, Some("base"), json!({})),
        ]);
        let result = reserve_and_oracle(&snapshot);
        assert!(result.score > 85.0, "expected near-perfect reserve score, got {}", result.score);
    }

    #[test]
    fn missing_metrics_redistribute_weight_rather_than_zeroing() {
        let snapshot = MetricSnapshot::default();
        let result = reserve_and_oracle(&snapshot);
        assert_eq!(result.score, 0.0);
        assert!(result.sub_scores.iter().all(|s| s.score.is_none()));
    }

    #[test]
    fn lending_metrics_weight_by_supplied_usd() {
        let snapshot = MetricSnapshot::from_samples(vec![
            sample(
                MetricName::UtilizationRate,
                90.0,
                Some("ethereum"),
                json!({"total_supplied_usd": 100_000.0}),
            ),
            sample(
                MetricName::UtilizationRate,
                10.0,
                Some("base"),
                json!({"total_supplied_usd": 900_000.0}),
            ),
        ]);
        let weighted = tvl_weighted(&snapshot, MetricName::UtilizationRate, "total_supplied_usd").unwrap();
        assert!((weighted - 18.0).abs() < 1e-6, "expected 18.0, got {weighted}");
    }
}
