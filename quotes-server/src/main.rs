//! Quotes Server
//!
//! Consumes relay feeds into 5s candles, keeps the price cache warm and
//! settles expired contracts.

mod config;

use config::ServerConfig;
use quotes_core::InstrumentCatalog;
use quotes_services::{
    BalanceCache, CandleWriter, NotificationSink, PriceService, QuoteStorage, RelayConfig,
    RelayFeedClient, SettlementWorker, TickWindower, UserEventHub, WindowerConfig,
    DEFAULT_WRITE_QUEUE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const TICK_CHANNEL_CAPACITY: usize = 1_024;
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

struct FeedTasks {
    name: &'static str,
    relay: JoinHandle<()>,
    windower: JoinHandle<()>,
    writer: JoinHandle<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,quotes_services=debug,quotes_server=debug")
            }),
        )
        .init();

    info!("Starting quotes server");

    let config = ServerConfig::from_env()?;

    info!("Initializing quote storage at: {}", config.db_path.display());
    let storage = Arc::new(QuoteStorage::new(&config.db_path)?);

    let catalog = InstrumentCatalog::default();
    info!("Loaded {} instruments", catalog.len());
    let prices = Arc::new(PriceService::new(storage.clone(), catalog));
    let balances = Arc::new(BalanceCache::new());
    let events = Arc::new(UserEventHub::default());

    // Until a client gateway subscribes, user events go to the log
    tokio::spawn(log_user_events(events.subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut feeds = Vec::new();

    for (feed, url) in &config.relays {
        let (sink, writer) = CandleWriter::spawn(storage.clone(), DEFAULT_WRITE_QUEUE);
        let windower = TickWindower::new(*feed, WindowerConfig::default()).with_sink(sink);
        prices.spawn_listener(windower.subscribe_prices());

        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let windower = tokio::spawn(windower.run(tick_rx));

        let client = RelayFeedClient::new(*feed, RelayConfig::for_feed(*feed, url.clone()));
        let relay = tokio::spawn(client.run(tick_tx, shutdown_rx.clone()));

        info!("{} feed started ({})", feed.display_name(), url);
        feeds.push(FeedTasks {
            name: feed.display_name(),
            relay,
            windower,
            writer,
        });
    }

    if feeds.is_empty() {
        warn!(
            "No relay URLs configured (FOREX_RELAY_URL, CRYPTO_RELAY_URL, OTC_RELAY_URL); \
             only settlement will run"
        );
    }

    let notifier: Arc<dyn NotificationSink> = events.clone();
    let worker = Arc::new(SettlementWorker::new(
        storage.clone(),
        prices.clone(),
        balances.clone(),
        notifier,
        config.settlement.clone(),
    ));
    worker.start();
    info!(
        "Settlement worker started (interval {:?}, batch {})",
        config.settlement.check_interval, config.settlement.batch_size
    );

    let mut status_interval = tokio::time::interval(STATUS_LOG_INTERVAL);
    status_interval.tick().await;
    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let status = worker.status();
                let cache = prices.cache_stats();
                info!(
                    "Status: {} prices cached ({} fresh), {} balances cached, \
                     {} settled, {} failed, {} in flight",
                    cache.size,
                    cache.fresh,
                    balances.stats().size,
                    status.settled_total,
                    status.failed_total,
                    status.in_flight
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    info!("Shutting down");
    worker.stop().await;
    let _ = shutdown_tx.send(true);

    // Relay exit drops the tick sender, which ends the windower, which
    // drops the candle sink and lets the writer drain.
    for tasks in feeds {
        let _ = tasks.relay.await;
        let _ = tasks.windower.await;
        match tasks.writer.await {
            Ok(written) => info!("{} feed stopped, {} candles written", tasks.name, written),
            Err(e) => warn!("{} feed writer failed: {}", tasks.name, e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn log_user_events(mut rx: broadcast::Receiver<quotes_services::UserEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = serde_json::to_string(&event.payload).unwrap_or_default();
                debug!("[Events] {} -> {}: {}", event.event, event.user_id, payload);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("[Events] Event log lagged {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
