use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::catalog::{MetricName, Operator, Severity};

/// Surfaced from store/registry operations when the backing Postgres pool
/// cannot service a call (spec §7). Never retried by the dispatcher itself —
/// a tick that hits this aborts its remaining writes and logs an
/// incomplete-tick event.
#[derive(Debug)]
pub struct StorageUnavailable {
    pub cause: String,
}

impl std::fmt::Display for StorageUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "storage unavailable: {}", self.cause)
    }
}

impl std::error::Error for StorageUnavailable {}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssetRow {
    pub symbol: String,
    pub name: String,
    pub asset_type: String,
    pub config: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MetricRow {
    pub asset_symbol: String,
    pub metric_name: MetricName,
    pub value: f64,
    pub chain: Option<String>,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertRow {
    pub id: Uuid,
    pub asset_symbol: String,
    pub metric_name: MetricName,
    pub value: f64,
    pub threshold_value: f64,
    pub operator: Operator,
    pub severity: Severity,
    pub message: String,
    pub chain: Option<String>,
    pub notified: bool,
    pub notification_channel: Option<String>,
    pub suppressed_count: i32,
    pub retry_count: i32,
    pub permanently_failed: bool,
    pub triggered_at: DateTime<Utc>,
}

/// Thin wrapper around `PgPool`. One method per logical operation on the
/// `morpho.rm_*` tables described in spec §6; every fallible call is wrapped
/// with `.context(...)` the way the teacher's `Database` does for every
/// query, and hand-extracts columns via `Row::try_get` rather than the
/// compile-time-checked `query_as!` macro (no live database at build time).
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---- rm_asset_registry ----

    pub async fn registry_upsert(
        &self,
        symbol: &str,
        name: &str,
        asset_type: &str,
        config: &Value,
        enabled: bool,
    ) -> anyhow::Result<AssetRow> {
        let row = sqlx::query(
            "INSERT INTO rm_asset_registry (symbol, name, asset_type, config, enabled, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             ON CONFLICT (symbol) DO UPDATE SET
                name = EXCLUDED.name,
                asset_type = EXCLUDED.asset_type,
                config = EXCLUDED.config,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
             RETURNING symbol, name, asset_type, config, enabled, created_at, updated_at",
        )
        .bind(symbol)
        .bind(name)
        .bind(asset_type)
        .bind(config)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("registry upsert failed")?;

        Self::row_to_asset(row)
    }

    pub async fn registry_get(&self, symbol: &str) -> anyhow::Result<Option<AssetRow>> {
        let row = sqlx::query(
            "SELECT symbol, name, asset_type, config, enabled, created_at, updated_at
             FROM rm_asset_registry WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("registry get failed")?;

        row.map(Self::row_to_asset).transpose()
    }

    pub async fn registry_list_enabled(&self) -> anyhow::Result<Vec<AssetRow>> {
        let rows = sqlx::query(
            "SELECT symbol, name, asset_type, config, enabled, created_at, updated_at
             FROM rm_asset_registry WHERE enabled = TRUE ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("registry list_enabled failed")?;

        rows.into_iter().map(Self::row_to_asset).collect()
    }

    pub async fn registry_disable(&self, symbol: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE rm_asset_registry SET enabled = FALSE, updated_at = NOW() WHERE symbol = $1",
        )
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("registry disable failed")?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_asset(row: sqlx::postgres::PgRow) -> anyhow::Result<AssetRow> {
        Ok(AssetRow {
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            asset_type: row.try_get("asset_type")?,
            config: row.try_get("config")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // ---- rm_metrics_history ----

    pub async fn metrics_append(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
        value: f64,
        chain: Option<&str>,
        metadata: &Value,
        recorded_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO rm_metrics_history (asset_symbol, metric_name, value, chain, metadata, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(asset_symbol)
        .bind(metric_name.as_str())
        .bind(value)
        .bind(chain)
        .bind(metadata)
        .bind(recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("metrics append failed")?;

        Ok(())
    }

    pub async fn metrics_latest(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
    ) -> anyhow::Result<Option<MetricRow>> {
        let row = sqlx::query(
            "SELECT asset_symbol, metric_name, value, chain, metadata, recorded_at
             FROM rm_metrics_history
             WHERE asset_symbol = $1 AND metric_name = $2
             ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(asset_symbol)
        .bind(metric_name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("metrics latest failed")?;

        row.map(Self::row_to_metric).transpose()
    }

    pub async fn metrics_range(
        &self,
        asset_symbol: &str,
        metric_name: MetricName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRow>> {
        let rows = sqlx::query(
            "SELECT asset_symbol, metric_name, value, chain, metadata, recorded_at
             FROM rm_metrics_history
             WHERE asset_symbol = $1 AND metric_name = $2 AND recorded_at >= $3 AND recorded_at <= $4
             ORDER BY recorded_at ASC",
        )
        .bind(asset_symbol)
        .bind(metric_name.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("metrics range failed")?;

        rows.into_iter().map(Self::row_to_metric).collect()
    }

    /// The `rm_latest_metrics` view, widened to distinct-on (metric, chain)
    /// rather than metric alone: a lending or liquidity fetcher emits one
    /// sample per market/pool sharing a metric name, tagged with `chain`
    /// (spec §4.4), and category scoring's TVL-weighted averaging (§4.9)
    /// needs every market's latest reading, not just whichever one was
    /// written most recently across the whole asset.
    pub async fn metrics_latest_all(&self, asset_symbol: &str) -> anyhow::Result<Vec<MetricRow>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (metric_name, chain) asset_symbol, metric_name, value, chain, metadata, recorded_at
             FROM rm_metrics_history
             WHERE asset_symbol = $1
             ORDER BY metric_name, chain, recorded_at DESC",
        )
        .bind(asset_symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("metrics latest_all failed")?;

        rows.into_iter().map(Self::row_to_metric).collect()
    }

    /// Consistent multi-metric snapshot: max-timestamp sample <= cutoff per
    /// (metric, chain), used by the scoring pipeline so it never observes
    /// writes made after the snapshot was taken (spec §5 ordering guarantee).
    pub async fn metrics_snapshot_at(
        &self,
        asset_symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRow>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (metric_name, chain) asset_symbol, metric_name, value, chain, metadata, recorded_at
             FROM rm_metrics_history
             WHERE asset_symbol = $1 AND recorded_at <= $2
             ORDER BY metric_name, chain, recorded_at DESC",
        )
        .bind(asset_symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("metrics snapshot failed")?;

        rows.into_iter().map(Self::row_to_metric).collect()
    }

    fn row_to_metric(row: sqlx::postgres::PgRow) -> anyhow::Result<MetricRow> {
        let metric_str: String = row.try_get("metric_name")?;
        let metric_name = MetricName::from_str(&metric_str)
            .with_context(|| format!("unknown metric_name in storage: {metric_str}"))?;
        Ok(MetricRow {
            asset_symbol: row.try_get("asset_symbol")?,
            metric_name,
            value: row.try_get("value")?,
            chain: row.try_get("chain")?,
            metadata: row.try_get("metadata")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    // ---- rm_alerts_log ----

    #[allow(clippy::too_many_arguments)]
    pub async fn alerts_create(
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
        let row = sqlx::query(
            "INSERT INTO rm_alerts_log
                (asset_symbol, metric_name, value, threshold_value, operator, severity, message,
                 chain, notified, notification_channel, suppressed_count, retry_count,
                 permanently_failed, triggered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, NULL, 0, 0, FALSE, $9)
             RETURNING id",
        )
        .bind(asset_symbol)
        .bind(metric_name.as_str())
        .bind(value)
        .bind(threshold_value)
        .bind(operator.as_str())
        .bind(severity.as_str())
        .bind(message)
        .bind(chain)
        .bind(triggered_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("alerts create failed")?;

        Ok(row.try_get("id")?)
    }

    pub async fn alerts_bump_suppressed_count(&self, alert_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE rm_alerts_log SET suppressed_count = suppressed_count + 1 WHERE id = $1",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("alerts bump suppressed failed")?;

        Ok(())
    }

    pub async fn alerts_pending(&self) -> anyhow::Result<Vec<AlertRow>> {
        let rows = sqlx::query(
            "SELECT id, asset_symbol, metric_name, value, threshold_value, operator, severity,
                    message, chain, notified, notification_channel, suppressed_count, retry_count,
                    permanently_failed, triggered_at
             FROM rm_alerts_log
             WHERE notified = FALSE AND permanently_failed = FALSE
             ORDER BY triggered_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("alerts pending failed")?;

        rows.into_iter().map(Self::row_to_alert).collect()
    }

    pub async fn alerts_mark_notified(&self, alert_id: Uuid, channel: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE rm_alerts_log SET notified = TRUE, notification_channel = $2 WHERE id = $1",
        )
        .bind(alert_id)
        .bind(channel)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("alerts mark_notified failed")?;

        Ok(())
    }

    pub async fn alerts_bump_retry(&self, alert_id: Uuid) -> anyhow::Result<i32> {
        let row = sqlx::query(
            "UPDATE rm_alerts_log SET retry_count = retry_count + 1 WHERE id = $1
             RETURNING retry_count",
        )
        .bind(alert_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageUnavailable { cause: e.to_string() })
        .context("alerts bump_retry failed")?;

        Ok(row.try_get("retry_count")?)
    }

    pub async fn alerts_mark_permanently_failed(&self, alert_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE rm_alerts_log SET permanently_failed = TRUE WHERE id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageUnavailable { cause: e.to_string() })
            .context("alerts mark_permanently_failed failed")?;

        Ok(())
    }

    fn row_to_alert(row: sqlx::postgres::PgRow) -> anyhow::Result<AlertRow> {
        let metric_str: String = row.try_get("metric_name")?;
        let op_str: String = row.try_get("operator")?;
        let sev_str: String = row.try_get("severity")?;
        Ok(AlertRow {
            id: row.try_get("id")?,
            asset_symbol: row.try_get("asset_symbol")?,
            metric_name: MetricName::from_str(&metric_str)
                .context("unknown metric_name in alert row")?,
            value: row.try_get("value")?,
            threshold_value: row.try_get("threshold_value")?,
            operator: operator_from_str(&op_str)?,
            severity: severity_from_str(&sev_str)?,
            message: row.try_get("message")?,
            chain: row.try_get("chain")?,
            notified: row.try_get("notified")?,
            notification_channel: row.try_get("notification_channel")?,
            suppressed_count: row.try_get("suppressed_count")?,
            retry_count: row.try_get("retry_count")?,
            permanently_failed: row.try_get("permanently_failed")?,
            triggered_at: row.try_get("triggered_at")?,
        })
    }
}

fn operator_from_str(s: &str) -> anyhow::Result<Operator> {
    Ok(match s {
        "<" => Operator::Lt,
        "<=" => Operator::Le,
        ">" => Operator::Gt,
        ">=" => Operator::Ge,
        "=" => Operator::Eq,
        other => anyhow::bail!("unknown operator in storage: {other}"),
    })
}

fn severity_from_str(s: &str) -> anyhow::Result<Severity> {
    Ok(match s {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "critical" => Severity::Critical,
        other => anyhow::bail!("unknown severity in storage: {other}"),
    })
}
