//! C6: Alert Engine (spec §4.6).
//!
//! Evaluates one freshly-written metric sample against the catalog's
//! threshold rules (global rules shadowed by per-asset overrides), renders a
//! human message via handlebars, and writes one `rm_alerts_log` row per rule
//! that fires — unless that exact (asset, metric, operator, threshold,
//! severity) tuple is already inside its suppression window, in which case
//! the existing row's `suppressed_count` is bumped instead (spec §9: both a
//! warning and a critical rule firing on the same sample are NOT collapsed
//! into one row — each severity tracks its own suppression window).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    cache::RedisCache,
    catalog::{Catalog, MetricName, Operator, Severity, ThresholdRule},
    db::Database,
    metrics::Metrics,
};

const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SuppressionEntry {
    alert_id: Uuid,
}

fn suppression_key(
    asset_symbol: &str,
    rule: &ThresholdRule,
) -> String {
    format!(
        "risk:v1:suppress:{}:{}:{}:{}:{}",
        asset_symbol,
        rule.metric.as_str(),
        rule.operator.as_str(),
        rule.threshold_value,
        rule.severity.as_str()
    )
}

/// The suppression check `AlertEngine` needs from its cache, seamed out the
/// same way `NotificationTransport` seams out delivery — so the
/// suppress/create/bump path can be driven by an in-memory fake in tests
/// instead of requiring live Redis.
#[async_trait]
pub trait SuppressionCache: Send + Sync {
    async fn get_suppression(&self, key: &str) -> anyhow::Result<Option<Uuid>>;
    async fn set_suppression(&self, key: &str, alert_id: Uuid, ttl: Duration) -> anyhow::Result<()>;
}

#[async_trait]
impl SuppressionCache for RedisCache {
    async fn get_suppression(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        Ok(self
            .get_json::<SuppressionEntry>(key)
            .await?
            .map(|entry| entry.alert_id))
    }

    async fn set_suppression(&self, key: &str, alert_id: Uuid, ttl: Duration) -> anyhow::Result<()> {
        self.set_json(key, &SuppressionEntry { alert_id }, ttl).await
    }
}

/// The two `rm_alerts_log` operations `AlertEngine` needs, seamed out so the
/// suppress/create/bump path can be exercised without a live Postgres.
#[async_trait]
pub trait AlertLog: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn alerts_create(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
        value: f64,
        threshold_value: f64,
        operator: Operator,
        severity: Severity,
        message: &str,
        chain: Option<&str>,
        triggered_at: DateTime<Utc>,
    ) -> anyhow::Result<Uuid>;

    async fn alerts_bump_suppressed_count(&self, alert_id: Uuid) -> anyhow::Result<()>;
}

#[async_trait]
impl AlertLog for Database {
    async fn alerts_create(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
        value: f64,
        threshold_value: f64,
        operator: Operator,
        severity: Severity,
        message: &str,
        chain: Option<&str>,
        triggered_at: DateTime<Utc>,
    ) -> anyhow::Result<Uuid> {
        Database::alerts_create(
            self,
            asset_symbol,
            metric_name,
            value,
            threshold_value,
            operator,
            severity,
            message,
            chain,
            triggered_at,
        )
        .await
    }

    async fn alerts_bump_suppressed_count(&self, alert_id: Uuid) -> anyhow::Result<()> {
        Database::alerts_bump_suppressed_count(self, alert_id).await
    }
}

/// Renders the templated alert body. Grounded in the teacher's
/// `EmailTemplateEngine` (`email/templates.rs`): one `Handlebars` instance,
/// templates registered once at construction via `include_str!`.
#[derive(Clone)]
struct AlertTemplateEngine {
    handlebars: std::sync::Arc<Handlebars<'static>>,
}

impl AlertTemplateEngine {
    fn new() -> anyhow::Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_template_string(
            "threshold_breach",
            include_str!("../templates/threshold_breach.hbs"),
        )?;
        Ok(Self {
            handlebars: std::sync::Arc::new(handlebars),
        })
    }

    fn render(&self, data: &serde_json::Value) -> anyhow::Result<String> {
        Ok(self.handlebars.render("threshold_breach", data)?)
    }
}

#[derive(Clone)]
pub struct AlertEngine {
    catalog: Catalog,
    db: Arc<dyn AlertLog>,
    cache: Arc<dyn SuppressionCache>,
    metrics: Metrics,
    templates: AlertTemplateEngine,
    suppression_window: Duration,
}

impl AlertEngine {
    pub fn new<D, C>(catalog: Catalog, db: D, cache: C, metrics: Metrics) -> anyhow::Result<Self>
    where
        D: AlertLog + 'static,
        C: SuppressionCache + 'static,
    {
        Ok(Self {
            catalog,
            db: Arc::new(db),
            cache: Arc::new(cache),
            metrics,
            templates: AlertTemplateEngine::new()?,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
        })
    }

    pub fn with_suppression_window(mut self, window: Duration) -> Self {
        self.suppression_window = window;
        self
    }

    /// Evaluates every enabled rule matching `metric_name` for `asset_symbol`
    /// against `value`. Returns the ids of alerts newly created (suppressed
    /// breaches return no id of their own — the existing row is bumped).
    pub async fn evaluate_sample(
        &self,
        asset_symbol: &str,
        asset_name: &str,
        metric_name: MetricName,
        value: f64,
        chain: Option<&str>,
        triggered_at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Uuid>> {
        let rules = self.catalog.rules_for(asset_symbol, metric_name).await;
        let mut created = Vec::new();

        for rule in rules {
            if !rule.operator.evaluate(value, rule.threshold_value) {
                continue;
            }

            let key = suppression_key(asset_symbol, &rule);
            if let Ok(Some(alert_id)) = self.cache.get_suppression(&key).await {
                self.db.alerts_bump_suppressed_count(alert_id).await?;
                self.metrics.observe_alert_suppressed(rule.severity.as_str());
                continue;
            }

            let message = self.render_message(asset_symbol, asset_name, &rule, value, chain)?;
            let alert_id = self
                .db
                .alerts_create(
                    asset_symbol,
                    rule.metric,
                    value,
                    rule.threshold_value,
                    rule.operator,
                    rule.severity,
                    &message,
                    chain,
                    triggered_at,
                )
                .await?;

            self.cache
                .set_suppression(&key, alert_id, self.suppression_window)
                .await?;
            self.metrics.observe_alert_fired(rule.severity.as_str());
            created.push(alert_id);
        }

        Ok(created)
    }

    fn render_message(
        &self,
        asset_symbol: &str,
        asset_name: &str,
        rule: &ThresholdRule,
        value: f64,
        chain: Option<&str>,
    ) -> anyhow::Result<String> {
        let data = json!({
            "asset_symbol": asset_symbol,
            "asset_name": asset_name,
            "metric_name": rule.metric.as_str(),
            "operator": rule.operator.as_str(),
            "threshold_value": rule.threshold_value,
            "value": value,
            "severity": rule.severity.as_str(),
            "chain": chain,
        });
        self.templates.render(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::Mutex,
    };

    #[test]
    fn suppression_key_distinguishes_severities() {
        let base = ThresholdRule {
            id: Uuid::new_v4(),
            asset_symbol: None,
            metric: MetricName::PorRatio,
            operator: Operator::Lt,
            threshold_value: 1.0,
            severity: Severity::Warning,
            enabled: true,
        };
        let mut critical = base.clone();
        critical.severity = Severity::Critical;

        assert_ne!(
            suppression_key("WBTC", &base),
            suppression_key("WBTC", &critical)
        );
    }

    #[derive(Default, Clone)]
    struct FakeAlertLog {
        created: Arc<Mutex<Vec<Uuid>>>,
        suppressed_bumps: Arc<Mutex<HashMap<Uuid, u32>>>,
    }

    #[async_trait]
    impl AlertLog for FakeAlertLog {
        async fn alerts_create(
            &self,
            _asset_symbol: &str,
            _metric_name: MetricName,
            _value: f64,
            _threshold_value: f64,
            _operator: Operator,
            _severity: Severity,
            _message: &str,
            _chain: Option<&str>,
            _triggered_at: DateTime<Utc>,
        ) -> anyhow::Result<Uuid> {
            let id = Uuid::new_v4();
            self.created.lock().unwrap().push(id);
            Ok(id)
        }

        async fn alerts_bump_suppressed_count(&self, alert_id: Uuid) -> anyhow::Result<()> {
            *self.suppressed_bumps.lock().unwrap().entry(alert_id).or_insert(0) += 1;
            Ok(())
        }
    }

    /// Manual `expire` replaces the TTL-driven expiry a real Redis key would
    /// give: the test drives suppression-window elapse deterministically
    /// instead of sleeping.
    #[derive(Default, Clone)]
    struct InMemorySuppressionCache {
        entries: Arc<Mutex<HashMap<String, Uuid>>>,
    }

    impl InMemorySuppressionCache {
        fn expire(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }
    }

    #[async_trait]
    impl SuppressionCache for InMemorySuppressionCache {
        async fn get_suppression(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
            Ok(self.entries.lock().unwrap().get(key).copied())
        }

        async fn set_suppression(&self, key: &str, alert_id: Uuid, _ttl: Duration) -> anyhow::Result<()> {
            self.entries.lock().unwrap().insert(key.to_string(), alert_id);
            Ok(())
        }
    }

    fn rule(metric: MetricName, threshold: f64, severity: Severity) -> ThresholdRule {
        ThresholdRule {
            id: Uuid::new_v4(),
            asset_symbol: None,
            metric,
            operator: Operator::Gt,
            threshold_value: threshold,
            severity,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn repeated_breaches_within_window_suppress_then_refire_after_elapse() {
        let catalog = Catalog::bootstrap();
        catalog
            .reload(vec![rule(MetricName::PegDeviationPct, 2.0, Severity::Warning)])
            .await;

        let db = FakeAlertLog::default();
        let db_handle = db.clone();
        let cache = InMemorySuppressionCache::default();
        let cache_handle = cache.clone();
        let metrics = Metrics::new().expect("metrics registry");
        let engine = AlertEngine::new(catalog, db, cache, metrics)
            .expect("engine construction")
            .with_suppression_window(Duration::from_secs(15 * 60));

        let now = Utc::now();

        let first = engine
            .evaluate_sample("WBTC", "Wrapped Bitcoin", MetricName::PegDeviationPct, 3.0, None, now)
            .await
            .unwrap();
        assert_eq!(first.len(), 1, "first breach should create one alert");

        let second = engine
            .evaluate_sample("WBTC", "Wrapped Bitcoin", MetricName::PegDeviationPct, 3.5, None, now)
            .await
            .unwrap();
        assert!(second.is_empty(), "breach inside the suppression window should not create a new alert");

        let third = engine
            .evaluate_sample("WBTC", "Wrapped Bitcoin", MetricName::PegDeviationPct, 4.0, None, now)
            .await
            .unwrap();
        assert!(third.is_empty(), "still-suppressed breach should not create a new alert");

        assert_eq!(db_handle.created.lock().unwrap().len(), 1);
        let suppressed_bumps = db_handle.suppressed_bumps.lock().unwrap();
        assert_eq!(*suppressed_bumps.values().next().unwrap(), 2, "two suppressed breaches should bump the count twice");
        drop(suppressed_bumps);

        let key = suppression_key(
            "WBTC",
            &rule(MetricName::PegDeviationPct, 2.0, Severity::Warning),
        );
        cache_handle.expire(&key);

        let fourth = engine
            .evaluate_sample("WBTC", "Wrapped Bitcoin", MetricName::PegDeviationPct, 5.0, None, now)
            .await
            .unwrap();
        assert_eq!(fourth.len(), 1, "breach after the window elapses should create a fresh alert");
        assert_eq!(db_handle.created.lock().unwrap().len(), 2);
    }
}
