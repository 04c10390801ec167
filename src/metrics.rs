use std::time::Duration;

use anyhow::Context;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    invalidations: IntCounterVec,
    request_latency: HistogramVec,
    fetch_attempts: IntCounterVec,
    ticks_incomplete: IntCounterVec,
    alerts_fired: IntCounterVec,
    alerts_suppressed: IntCounterVec,
    scoring_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cache_hits = IntCounterVec::new(
            prometheus::Opts::new("cache_hits_total", "Cache hits by layer and endpoint"),
            &["layer", "endpoint"],
        )
        .context("cache_hits metric")?;

        let cache_misses = IntCounterVec::new(
            prometheus::Opts::new("cache_misses_total", "Cache misses by layer and endpoint"),
            &["layer", "endpoint"],
        )
        .context("cache_misses metric")?;

        let invalidations = IntCounterVec::new(
            prometheus::Opts::new("cache_invalidations_total", "Cache invalidations by scope"),
            &["scope"],
        )
        .context("cache_invalidations metric")?;

        let request_latency = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP latency in seconds",
            ),
            &["endpoint"],
        )
        .context("request_latency metric")?;

        let fetch_attempts = IntCounterVec::new(
            prometheus::Opts::new(
                "fetch_attempts_total",
                "Fetcher invocations by kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .context("fetch_attempts metric")?;

        let ticks_incomplete = IntCounterVec::new(
            prometheus::Opts::new(
                "ticks_incomplete_total",
                "Dispatcher ticks that ended with at least one failed work unit",
            ),
            &["class"],
        )
        .context("ticks_incomplete metric")?;

        let alerts_fired = IntCounterVec::new(
            prometheus::Opts::new("alerts_fired_total", "Alerts written by severity"),
            &["severity"],
        )
        .context("alerts_fired metric")?;

        let alerts_suppressed = IntCounterVec::new(
            prometheus::Opts::new(
                "alerts_suppressed_total",
                "Threshold breaches suppressed within the active window",
            ),
            &["severity"],
        )
        .context("alerts_suppressed metric")?;

        let scoring_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "scoring_duration_seconds",
                "Wall time to produce one asset's score artifact",
            ),
            &["asset_symbol"],
        )
        .context("scoring_duration metric")?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(invalidations.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(fetch_attempts.clone()))?;
        registry.register(Box::new(ticks_incomplete.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;
        registry.register(Box::new(alerts_suppressed.clone()))?;
        registry.register(Box::new(scoring_duration.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            invalidations,
            request_latency,
            fetch_attempts,
            ticks_incomplete,
            alerts_fired,
            alerts_suppressed,
            scoring_duration,
        })
    }

    pub fn observe_hit(&self, layer: &str, endpoint: &str) {
        self.cache_hits.with_label_values(&[layer, endpoint]).inc();
    }

    pub fn observe_miss(&self, layer: &str, endpoint: &str) {
        self.cache_misses
            .with_label_values(&[layer, endpoint])
            .inc();
    }

    pub fn observe_invalidation(&self, scope: &str, count: usize) {
        if count > 0 {
            self.invalidations
                .with_label_values(&[scope])
                .inc_by(count as u64);
        }
    }

    pub fn observe_request(&self, endpoint: &str, duration: Duration) {
        self.request_latency
            .with_label_values(&[endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_fetch_attempt(&self, kind: &str, outcome: &str) {
        self.fetch_attempts.with_label_values(&[kind, outcome]).inc();
    }

    pub fn observe_tick_incomplete(&self, class: &str) {
        self.ticks_incomplete.with_label_values(&[class]).inc();
    }

    pub fn observe_alert_fired(&self, severity: &str) {
        self.alerts_fired.with_label_values(&[severity]).inc();
    }

    pub fn observe_alert_suppressed(&self, severity: &str) {
        self.alerts_suppressed.with_label_values(&[severity]).inc();
    }

    pub fn observe_scoring(&self, asset_symbol: &str, duration: Duration) {
        self.scoring_duration
            .with_label_values(&[asset_symbol])
            .observe(duration.as_secs_f64());
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
