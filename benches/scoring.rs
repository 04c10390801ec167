//! Benchmarks the synchronous half of the scoring pipeline
//! (`scoring::score_from_parts`): primary checks, category scoring, and
//! breaker aggregation over one asset's snapshot. No database or network
//! I/O is on this path, so this is where a regression in the scoring math
//! itself — not store or registry latency — would show up.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use morpho_risk_core::{
    catalog::MetricName,
    config_doc::{Audit, AuditData, AssetConfig, BlacklistControl, CustodyModel, Governance},
    scoring::score_from_parts,
    store::{MetricSample, MetricSnapshot},
};

fn sample(metric: MetricName, value: f64, chain: Option<&str>) -> MetricSample {
    MetricSample {
        asset_symbol: "WBTC".to_string(),
        metric_name: metric,
        value,
        chain: chain.map(str::to_string),
        context: serde_json::json!({}),
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
        blacklist_control: BlacklistControl::None,
    });
    config
}

fn full_snapshot() -> MetricSnapshot {
    MetricSnapshot::from_samples(vec![
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
    ])
}

fn bench_score_from_parts(c: &mut Criterion) {
    let config = qualified_config();
    let snapshot = full_snapshot();

    let mut group = c.benchmark_group("scoring");
    group.bench_function("fully_qualified_asset", |b| {
        b.iter(|| score_from_parts("WBTC", &config, &snapshot, Utc::now()))
    });

    let disqualified_config = AssetConfig::default();
    let empty_snapshot = MetricSnapshot::default();
    group.bench_function("disqualified_asset", |b| {
        b.iter(|| score_from_parts("WBTC", &disqualified_config, &empty_snapshot, Utc::now()))
    });
    group.finish();
}

criterion_group!(benches, bench_score_from_parts);
criterion_main!(benches);
