//! C7: Notifier (spec §4.7).
//!
//! Polls `rm_alerts_log` for alerts not yet notified, hands each to a
//! `NotificationTransport`, and retries failures up to a fixed cap before
//! marking the alert permanently failed — the same shape as the teacher's
//! `EmailQueue::mark_failed` retry bookkeeping, simplified to a poll loop
//! since alerts have no separate outbound queue of their own.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::db::{AlertRow, Database};

const MAX_RETRY_COUNT: i32 = 5;

/// A transport's delivery attempt failed. Carries the channel it was
/// attempting (for the retry log line) separately from the underlying cause,
/// the same split `FetchError` makes between the fetcher kind and its cause.
#[derive(Debug)]
pub struct NotificationTransportError {
    pub channel: &'static str,
    pub cause: String,
}

impl std::fmt::Display for NotificationTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification transport '{}' failed: {}", self.channel, self.cause)
    }
}

impl std::error::Error for NotificationTransportError {}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Delivers one alert. On success, returns the channel name it was sent
    /// through (stored on the alert row for audit).
    async fn send(&self, alert: &AlertRow) -> Result<String, NotificationTransportError>;
}

/// Default transport: logs at a level matched to severity. Real deployments
/// swap this for a webhook/PagerDuty transport without touching `Notifier`.
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn send(&self, alert: &AlertRow) -> Result<String, NotificationTransportError> {
        match alert.severity {
            crate::catalog::Severity::Critical => error!(
                asset = %alert.asset_symbol,
                metric = alert.metric_name.as_str(),
                value = alert.value,
                threshold = alert.threshold_value,
                "alert"
            ),
            crate::catalog::Severity::Warning => warn!(
                asset = %alert.asset_symbol,
                metric = alert.metric_name.as_str(),
                value = alert.value,
                threshold = alert.threshold_value,
                "alert"
            ),
            crate::catalog::Severity::Info => info!(
                asset = %alert.asset_symbol,
                metric = alert.metric_name.as_str(),
                value = alert.value,
                threshold = alert.threshold_value,
                "alert"
            ),
        }
        Ok("log".to_string())
    }
}

#[derive(Clone)]
pub struct Notifier {
    db: Database,
    transport: std::sync::Arc<dyn NotificationTransport>,
}

impl Notifier {
    pub fn new(db: Database, transport: std::sync::Arc<dyn NotificationTransport>) -> Self {
        Self { db, transport }
    }

    /// One polling pass: attempts delivery of every pending alert, retrying
    /// failures in place (no backoff delay between polls — the interval
    /// driver itself provides the spacing) up to `MAX_RETRY_COUNT`.
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let pending = self.db.alerts_pending().await?;
        let mut delivered = 0;

        for alert in pending {
            match self.transport.send(&alert).await {
                Ok(channel) => {
                    self.db.alerts_mark_notified(alert.id, &channel).await?;
                    delivered += 1;
                }
                Err(err) => {
                    let retry_count = self.db.alerts_bump_retry(alert.id).await?;
                    if retry_count >= MAX_RETRY_COUNT {
                        self.db.alerts_mark_permanently_failed(alert.id).await?;
                        error!(
                            alert_id = %alert.id,
                            retry_count,
                            error = %err,
                            "alert permanently failed to deliver"
                        );
                    } else {
                        warn!(
                            alert_id = %alert.id,
                            retry_count,
                            error = %err,
                            "alert delivery failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(delivered)
    }
}
