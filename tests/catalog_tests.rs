//! Integration coverage for the threshold catalog (spec §4.2/§6) through the
//! public crate surface: seed rules, per-asset overrides, and the
//! frequency-class partition the scheduling drivers in `main.rs` rely on.

use morpho_risk_core::catalog::{Catalog, FrequencyClass, MetricName, Operator, Severity, ThresholdRule};

#[tokio::test]
async fn seed_rules_cover_every_metric_the_catalog_seeds_for() {
    let catalog = Catalog::bootstrap();
    let rules = catalog.all().await;
    assert!(!rules.is_empty());
    assert!(rules.iter().all(|r| r.enabled));
    assert!(rules.iter().all(|r| r.asset_symbol.is_none()));
}

#[tokio::test]
async fn reload_replaces_the_whole_rule_set_atomically() {
    let catalog = Catalog::bootstrap();
    let before = catalog.all().await.len();

    catalog
        .reload(vec![ThresholdRule {
            id: uuid::Uuid::new_v4(),
            asset_symbol: None,
            metric: MetricName::PorRatio,
            operator: Operator::Lt,
            threshold_value: 1.0,
            severity: Severity::Critical,
            enabled: true,
        }])
        .await;

    let after = catalog.all().await;
    assert_eq!(after.len(), 1);
    assert_ne!(after.len(), before);
}

#[tokio::test]
async fn per_asset_rule_shadows_global_rule_with_the_same_operator_and_threshold() {
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

    let for_wbtc = catalog.rules_for("WBTC", MetricName::PorRatio).await;
    let for_other = catalog.rules_for("WETH", MetricName::PorRatio).await;

    assert!(for_wbtc
        .iter()
        .filter(|r| r.operator == Operator::Lt && r.threshold_value == 1.0)
        .count()
        == 1, "the per-asset override should replace, not duplicate, the shadowed global rule");
    assert!(for_other
        .iter()
        .any(|r| r.severity == Severity::Critical && r.threshold_value == 1.0));
}

#[test]
fn every_metric_belongs_to_exactly_one_frequency_class() {
    let mut seen = std::collections::HashSet::new();
    for class in [
        FrequencyClass::Critical,
        FrequencyClass::High,
        FrequencyClass::Medium,
        FrequencyClass::Daily,
    ] {
        for metric in class.metrics() {
            assert!(seen.insert(metric), "{:?} appears in more than one frequency class", metric);
        }
    }
}

#[test]
fn operator_evaluate_matches_its_display_semantics() {
    assert!(Operator::Lt.evaluate(0.5, 1.0));
    assert!(!Operator::Lt.evaluate(1.0, 1.0));
    assert!(Operator::Ge.evaluate(1.0, 1.0));
    assert!(Operator::Eq.evaluate(1.0, 1.0));
    assert!(!Operator::Eq.evaluate(1.0001, 1.0));
}
