//! Price Service
//!
//! Answers "current price" and "price at instant T" queries. Latest prices
//! arrive from the tick windowers over a broadcast channel and live in an
//! in-memory cache; anything stale or missing falls through to the store.

use chrono::Utc;
use dashmap::DashMap;
use quotes_core::{Candle, InstrumentCatalog, PriceProvenance, PriceSample};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::{QuoteStorage, StorageError};

/// Default tolerance for `price_at`, in milliseconds
pub const DEFAULT_PRICE_TOLERANCE_MS: i64 = 5_000;

/// Configuration for the price service
#[derive(Debug, Clone)]
pub struct PriceServiceConfig {
    /// Cached prices younger than this are served without touching the store
    pub freshness: Duration,
    /// Persisted prices older than this are served with a warning
    pub stale_warning_age: Duration,
    /// Requested instants further in the future are replaced by "now"
    pub max_future_skew: Duration,
    /// Requested instants further in the past are replaced by "now"
    pub max_past_age: Duration,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(1),
            stale_warning_age: Duration::from_secs(60),
            max_future_skew: Duration::from_secs(365 * 24 * 60 * 60),
            max_past_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// One cached price, as reported by `cache_stats`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPrice {
    pub instrument: String,
    pub price: f64,
    pub age_ms: i64,
    pub provenance: PriceProvenance,
}

/// Price cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCacheStats {
    pub size: usize,
    pub fresh: usize,
    pub entries: Vec<CachedPrice>,
}

/// Price lookups with a cache → store → fallback chain
pub struct PriceService {
    cache: DashMap<String, PriceSample>,
    storage: Arc<QuoteStorage>,
    catalog: InstrumentCatalog,
    config: PriceServiceConfig,
}

impl PriceService {
    pub fn new(storage: Arc<QuoteStorage>, catalog: InstrumentCatalog) -> Self {
        Self::with_config(storage, catalog, PriceServiceConfig::default())
    }

    pub fn with_config(
        storage: Arc<QuoteStorage>,
        catalog: InstrumentCatalog,
        config: PriceServiceConfig,
    ) -> Self {
        Self {
            cache: DashMap::new(),
            storage,
            catalog,
            config,
        }
    }

    /// Record a published price in the live cache.
    ///
    /// An older sample never replaces a newer one for the same instrument.
    pub fn record(&self, sample: PriceSample) {
        if !sample.is_usable() {
            debug!(
                "[PriceService] Ignoring unusable price {} for {}",
                sample.price, sample.instrument
            );
            return;
        }

        self.cache
            .entry(sample.instrument.clone())
            .and_modify(|cached| {
                if sample.observed_at_ms >= cached.observed_at_ms {
                    *cached = sample.clone();
                }
            })
            .or_insert(sample);
    }

    /// Subscribe to a windower's price stream, feeding the cache until the
    /// sender side is dropped
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<PriceSample>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            info!("[PriceService] Listening for price updates");
            loop {
                match rx.recv().await {
                    Ok(sample) => service.record(sample),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[PriceService] Price receiver lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("[PriceService] Price channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Membership test against the configured instrument catalog
    pub fn is_valid_instrument(&self, instrument: &str) -> bool {
        self.catalog.contains(instrument)
    }

    /// Current price for an instrument
    pub fn current_price(&self, instrument: &str) -> Result<PriceSample, PriceError> {
        self.current_price_as_of(instrument, Utc::now().timestamp_millis())
    }

    /// Current price, judging cache freshness against `now_ms`
    pub fn current_price_as_of(
        &self,
        instrument: &str,
        now_ms: i64,
    ) -> Result<PriceSample, PriceError> {
        if let Some(cached) = self.cache.get(instrument) {
            let age = cached.age_ms(now_ms);
            if age < self.freshness_ms() {
                let mut sample = cached.clone();
                sample.provenance = PriceProvenance::LiveCache;
                return Ok(sample);
            }
            debug!(
                "[PriceService] Cached price for {} is {}ms old, reading store",
                instrument, age
            );
        }

        let candle = self
            .storage
            .latest_candle(instrument)?
            .ok_or_else(|| PriceError::NoPriceData {
                instrument: instrument.to_string(),
            })?;

        usable_close(instrument, &candle)?;

        let age = now_ms - candle.window_start;
        if age > self.config.stale_warning_age.as_millis() as i64 {
            warn!(
                "[PriceService] Persisted price for {} is stale ({}s old)",
                instrument,
                age / 1_000
            );
        }

        let sample = PriceSample::new(
            instrument,
            candle.close,
            candle.window_start,
            PriceProvenance::Persisted,
        );
        self.record(sample.clone());

        Ok(sample)
    }

    /// Price of an instrument at `timestamp_ms`, within `tolerance_ms`
    pub fn price_at(
        &self,
        instrument: &str,
        timestamp_ms: i64,
        tolerance_ms: i64,
    ) -> Result<PriceSample, PriceError> {
        self.price_at_as_of(
            instrument,
            timestamp_ms,
            tolerance_ms,
            Utc::now().timestamp_millis(),
        )
    }

    /// `price_at` with an explicit notion of "now"
    ///
    /// Fallback order: windowed match, most recent candle at any distance,
    /// then the current price.
    pub fn price_at_as_of(
        &self,
        instrument: &str,
        timestamp_ms: i64,
        tolerance_ms: i64,
        now_ms: i64,
    ) -> Result<PriceSample, PriceError> {
        let ts = self.clamp_timestamp(instrument, timestamp_ms, now_ms);
        let tolerance_ms = tolerance_ms.max(0);

        if let Some(candle) = self.storage.candle_near(instrument, ts, tolerance_ms)? {
            let price = usable_close(instrument, &candle)?;
            return Ok(PriceSample::new(
                instrument,
                price,
                candle.window_start,
                PriceProvenance::WindowedMatch,
            )
            .relative_to(ts, PriceProvenance::WindowedMatch));
        }

        if let Some(candle) = self.storage.latest_candle(instrument)? {
            let price = usable_close(instrument, &candle)?;
            let sample = PriceSample::new(
                instrument,
                price,
                candle.window_start,
                PriceProvenance::NearestAvailable,
            )
            .relative_to(ts, PriceProvenance::NearestAvailable);
            warn!(
                "[PriceService] No candle for {} within ±{}ms of {}, using latest ({}ms away)",
                instrument,
                tolerance_ms,
                ts,
                sample.time_diff_ms.unwrap_or_default()
            );
            return Ok(sample);
        }

        warn!(
            "[PriceService] No candle history for {}, falling back to current price",
            instrument
        );
        let current = self.current_price_as_of(instrument, now_ms)?;
        Ok(current.relative_to(ts, PriceProvenance::CurrentPriceFallback))
    }

    /// Snapshot of every cached price
    pub fn cache_stats(&self) -> PriceCacheStats {
        let now_ms = Utc::now().timestamp_millis();
        let freshness_ms = self.freshness_ms();

        let mut entries: Vec<CachedPrice> = self
            .cache
            .iter()
            .map(|entry| CachedPrice {
                instrument: entry.key().clone(),
                price: entry.price,
                age_ms: entry.age_ms(now_ms),
                provenance: entry.provenance,
            })
            .collect();
        entries.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        PriceCacheStats {
            size: entries.len(),
            fresh: entries.iter().filter(|e| e.age_ms < freshness_ms).count(),
            entries,
        }
    }

    /// Replace implausible timestamps with `now_ms`
    fn clamp_timestamp(&self, instrument: &str, timestamp_ms: i64, now_ms: i64) -> i64 {
        let max_future = self.config.max_future_skew.as_millis() as i64;
        let max_past = self.config.max_past_age.as_millis() as i64;

        if timestamp_ms > now_ms + max_future {
            warn!(
                "[PriceService] Timestamp {} for {} is too far in the future, using now",
                timestamp_ms, instrument
            );
            now_ms
        } else if timestamp_ms < now_ms - max_past {
            warn!(
                "[PriceService] Timestamp {} for {} is too old, using now",
                timestamp_ms, instrument
            );
            now_ms
        } else {
            timestamp_ms
        }
    }

    fn freshness_ms(&self) -> i64 {
        self.config.freshness.as_millis() as i64
    }
}

/// A persisted close is only a price if it is finite and positive
fn usable_close(instrument: &str, candle: &Candle) -> Result<f64, PriceError> {
    if !candle.close.is_finite() || candle.close <= 0.0 {
        return Err(PriceError::InvalidPrice {
            instrument: instrument.to_string(),
            price: candle.close,
        });
    }
    Ok(candle.close)
}

/// Errors from price lookups
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("No price data for {instrument}")]
    NoPriceData { instrument: String },

    #[error("Invalid price for {instrument}: {price}")]
    InvalidPrice { instrument: String, price: f64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
