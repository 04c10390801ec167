use std::sync::Arc;

use morpho_risk_core::{
    alerts::AlertEngine,
    cache::RedisCache,
    catalog::{Catalog, FrequencyClass},
    config::Config,
    db::Database,
    dispatcher::{Dispatcher, FetcherTable},
    fetchers::{DistributionFetcher, LendingFetcher, LiquidityFetcher, MarketFetcher, OracleFetcher, ReserveFetcher},
    metrics::Metrics,
    notifier::{LoggingTransport, Notifier},
    registry::Registry,
    router,
    store::Store,
    AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let metrics = Metrics::new()?;
    let cache = RedisCache::new(&config.redis_url).await?;
    let db = Database::new(&config.database_url).await?;

    let registry = Registry::new(db.clone());
    let store = Store::new(db.clone());
    let catalog = Catalog::bootstrap();
    let alert_engine = AlertEngine::new(catalog.clone(), db.clone(), cache.clone(), metrics.clone())?
        .with_suppression_window(config.suppression_window);

    let http_client = reqwest::Client::builder()
        .timeout(config.http_client_timeout)
        .build()?;

    let fetchers = FetcherTable {
        oracle: Box::new(OracleFetcher::new(http_client.clone(), cache.clone(), metrics.clone())),
        reserve: Box::new(ReserveFetcher::new(http_client.clone(), cache.clone(), metrics.clone())),
        liquidity: Box::new(LiquidityFetcher::new(http_client.clone(), cache.clone(), metrics.clone())),
        lending: Box::new(LendingFetcher::new(http_client.clone(), cache.clone(), metrics.clone())),
        distribution: Box::new(DistributionFetcher::new(http_client.clone(), cache.clone(), metrics.clone())),
        market: Box::new(MarketFetcher::new(http_client, cache.clone(), metrics.clone())),
    };

    let dispatcher = Dispatcher::new(registry.clone(), store.clone(), fetchers, metrics.clone(), alert_engine.clone())
        .with_parallelism(config.dispatcher_parallelism);

    let notifier = Notifier::new(db.clone(), Arc::new(LoggingTransport));

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        registry,
        store,
        catalog,
        dispatcher: dispatcher.clone(),
        metrics,
    });

    spawn_tick_driver(dispatcher.clone(), FrequencyClass::Critical, config.schedule.critical_interval);
    spawn_tick_driver(dispatcher.clone(), FrequencyClass::High, config.schedule.high_interval);
    spawn_tick_driver(dispatcher.clone(), FrequencyClass::Medium, config.schedule.medium_interval);
    spawn_tick_driver(dispatcher, FrequencyClass::Daily, config.schedule.daily_interval);
    spawn_notifier_driver(notifier, config.schedule.critical_interval);

    let bind_addr = config.bind_addr;
    let app = router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("risk core listening on {bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// One of the four independent periodic drivers spec §5 calls for — each
/// frequency class ticks on its own `tokio::time::interval`, with ticks that
/// overrun their own deadline simply delaying the next tick rather than
/// overlapping it (`MissedTickBehavior::Delay`, the default).
fn spawn_tick_driver(dispatcher: Dispatcher, class: FrequencyClass, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = dispatcher.tick(class).await {
                tracing::error!(class = class.as_str(), error = %err, "dispatcher tick failed outright");
            }
        }
    });
}

fn spawn_notifier_driver(notifier: Notifier, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = notifier.tick().await {
                tracing::error!(error = %err, "notifier tick failed outright");
            }
        }
    });
}
