//! Tick Windower
//!
//! Turns one feed's tick stream into 5-second candles. Each instrument has at
//! most one live candle; a tick for a later window closes it and opens the
//! next one at the previous close, so the series never gaps across windows.
//!
//! The in-memory live map is the source of truth for the next tick. Store
//! writes go through a [`CandleSink`] and are fire-and-forget.

use quotes_core::{
    window_start, Candle, Feed, PriceProvenance, PriceSample, Tick, ValidationError,
    BASE_GRANULARITY_MS,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::candle_writer::CandleSink;

/// Configuration for a tick windower
#[derive(Debug, Clone)]
pub struct WindowerConfig {
    pub granularity_ms: i64,
    /// Closed candles kept in memory for diagnostics
    pub history_capacity: usize,
    /// Live candles are closed once the feed's clock is this far past
    /// their window end without a newer tick for them
    pub idle_close_grace_ms: i64,
    pub price_channel_capacity: usize,
}

impl Default for WindowerConfig {
    fn default() -> Self {
        Self {
            granularity_ms: BASE_GRANULARITY_MS,
            history_capacity: 100,
            idle_close_grace_ms: BASE_GRANULARITY_MS,
            price_channel_capacity: 1_024,
        }
    }
}

/// What a single accepted tick did
#[derive(Debug, Clone, PartialEq)]
pub struct WindowUpdate {
    /// The live candle after applying the tick
    pub live: Candle,
    /// The candle this tick closed, if it started a new window
    pub closed: Option<Candle>,
}

/// Counters for one windower
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub closed: u64,
    pub live_instruments: usize,
}

pub struct TickWindower {
    feed: Feed,
    config: WindowerConfig,
    live: HashMap<String, Candle>,
    history: VecDeque<Candle>,
    sink: Option<CandleSink>,
    prices: broadcast::Sender<PriceSample>,
    stats: WindowerStats,
    /// Latest accepted tick time across all instruments
    feed_clock_ms: Option<i64>,
}

impl TickWindower {
    pub fn new(feed: Feed, config: WindowerConfig) -> Self {
        let (prices, _) = broadcast::channel(config.price_channel_capacity.max(1));
        Self {
            feed,
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            live: HashMap::new(),
            sink: None,
            prices,
            stats: WindowerStats::default(),
            feed_clock_ms: None,
        }
    }

    /// Persist live and closed candles through `sink`
    pub fn with_sink(mut self, sink: CandleSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    /// Subscribe to the prices this windower publishes, one per accepted tick
    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceSample> {
        self.prices.subscribe()
    }

    pub fn live_candle(&self, instrument: &str) -> Option<&Candle> {
        self.live.get(instrument)
    }

    /// Recently closed candles, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Candle> {
        self.history.iter()
    }

    pub fn stats(&self) -> WindowerStats {
        WindowerStats {
            live_instruments: self.live.values().filter(|c| !c.is_closed).count(),
            ..self.stats.clone()
        }
    }

    /// Apply one tick. Rejected ticks leave every piece of state untouched.
    pub fn apply(&mut self, tick: &Tick) -> Result<WindowUpdate, ValidationError> {
        if let Err(e) = self.check(tick) {
            self.stats.rejected += 1;
            return Err(e);
        }

        let gran = self.config.granularity_ms;
        let tick_window = window_start(tick.tick_time_ms, gran);

        let mut closed = None;
        let live = match self.live.get_mut(&tick.instrument) {
            Some(candle) if candle.window_start == tick_window => {
                candle.close = tick.close;
                candle.high = candle.high.max(tick.high).max(tick.close);
                candle.low = candle.low.min(tick.low).min(tick.close);
                candle.volume += tick.volume_delta;
                candle.clone()
            }
            Some(candle) => {
                let previous_close = candle.close;
                if !candle.is_closed {
                    candle.is_closed = true;
                    closed = Some(candle.clone());
                }
                let next = Candle::open_window(
                    tick.instrument.as_str(),
                    tick_window,
                    gran,
                    previous_close,
                    tick.high,
                    tick.low,
                    tick.close,
                    tick.volume_delta,
                );
                *candle = next.clone();
                next
            }
            None => {
                let first = Candle::open_window(
                    tick.instrument.as_str(),
                    tick_window,
                    gran,
                    tick.open,
                    tick.high,
                    tick.low,
                    tick.close,
                    tick.volume_delta,
                );
                self.live.insert(tick.instrument.clone(), first.clone());
                first
            }
        };

        if let Some(candle) = &closed {
            self.retire(candle.clone());
        }
        self.persist(&live);
        self.publish(tick);
        self.stats.accepted += 1;
        self.feed_clock_ms = Some(
            self.feed_clock_ms
                .map_or(tick.tick_time_ms, |clock| clock.max(tick.tick_time_ms)),
        );

        Ok(WindowUpdate { live, closed })
    }

    /// Close live candles whose window ended more than the grace period
    /// before `now_ms`. They stay in the map so the next window still opens
    /// at their close. The run loop drives this with the feed's own clock.
    pub fn close_idle(&mut self, now_ms: i64) -> Vec<Candle> {
        let cutoff = now_ms - self.config.idle_close_grace_ms;
        let mut closed = Vec::new();

        for candle in self.live.values_mut() {
            if !candle.is_closed && candle.window_end <= cutoff {
                candle.is_closed = true;
                closed.push(candle.clone());
            }
        }

        for candle in &closed {
            debug!(
                "[{}] Closed idle candle {} @ {}",
                self.feed, candle.instrument, candle.window_start
            );
            self.retire(candle.clone());
        }

        closed
    }

    /// Consume ticks until the channel closes
    pub async fn run(mut self, mut ticks: mpsc::Receiver<Tick>) {
        info!("[{}] Tick windower started", self.feed);
        let mut idle = interval(Duration::from_millis(self.config.granularity_ms.max(1) as u64));

        loop {
            tokio::select! {
                maybe_tick = ticks.recv() => {
                    let Some(tick) = maybe_tick else { break };
                    if let Err(e) = self.apply(&tick) {
                        warn!("[{}] Dropped tick: {}", self.feed, e);
                    }
                }
                _ = idle.tick() => {
                    if let Some(clock) = self.feed_clock_ms {
                        self.close_idle(clock);
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            "[{}] Tick windower stopped ({} accepted, {} rejected, {} closed)",
            self.feed, stats.accepted, stats.rejected, stats.closed
        );
    }

    /// Field validation plus ordering against the instrument's live window
    fn check(&self, tick: &Tick) -> Result<(), ValidationError> {
        tick.validate()?;

        if let Some(live) = self.live.get(&tick.instrument) {
            let tick_window = window_start(tick.tick_time_ms, self.config.granularity_ms);
            let behind = tick_window < live.window_start;
            let into_closed = tick_window == live.window_start && live.is_closed;
            if behind || into_closed {
                return Err(ValidationError::StaleTick {
                    instrument: tick.instrument.clone(),
                    tick_window,
                    live_window: live.window_start,
                });
            }
        }

        Ok(())
    }

    fn retire(&mut self, candle: Candle) {
        self.persist(&candle);
        self.stats.closed += 1;
        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(candle);
    }

    fn persist(&self, candle: &Candle) {
        if let Some(sink) = &self.sink {
            sink.submit(candle.clone());
        }
    }

    fn publish(&self, tick: &Tick) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.prices.send(PriceSample::new(
            tick.instrument.as_str(),
            tick.close,
            tick.tick_time_ms,
            PriceProvenance::LiveStream,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_writer::CandleWriter;
    use crate::storage::QuoteStorage;
    use std::sync::Arc;

    fn windower() -> TickWindower {
        TickWindower::new(Feed::Forex, WindowerConfig::default())
    }

    fn tick(close: f64, time_ms: i64) -> Tick {
        Tick::new("X", close, close, close, close, 1.0, time_ms)
    }

    #[test]
    fn test_continuity_across_windows() {
        let mut w = windower();
        for (i, close) in [100.0, 101.0, 99.0, 102.0].into_iter().enumerate() {
            let update = w.apply(&tick(close, i as i64 * 1_000)).unwrap();
            assert!(update.closed.is_none());
        }

        let update = w.apply(&Tick::new("X", 110.0, 110.0, 103.0, 104.0, 1.0, 5_000)).unwrap();
        let first = update.closed.unwrap();
        assert_eq!(first.open, 100.0);
        assert_eq!(first.close, 102.0);
        assert!(first.high >= 102.0);
        assert!(first.low <= 99.0);
        assert_eq!(first.volume, 4.0);
        assert!(first.is_closed);

        // The new window opens at the previous close, not the tick's open
        assert_eq!(update.live.open, 102.0);
        assert_eq!(update.live.window_start, 5_000);
        assert!(update.live.is_well_formed());
        assert_eq!(w.history().count(), 1);
    }

    #[test]
    fn test_close_folded_into_range() {
        let mut w = windower();
        w.apply(&Tick::new("X", 1.0, 1.2, 0.9, 1.1, 0.0, 0)).unwrap();
        // Feed high/low lag its own close
        let update = w.apply(&Tick::new("X", 1.1, 1.1, 1.0, 1.5, 0.0, 1_000)).unwrap();
        assert_eq!(update.live.high, 1.5);
        let update = w.apply(&Tick::new("X", 1.1, 1.1, 1.0, 0.5, 0.0, 2_000)).unwrap();
        assert_eq!(update.live.low, 0.5);
        assert!(update.live.is_well_formed());
    }

    #[test]
    fn test_invalid_tick_leaves_state_untouched() {
        let mut w = windower();
        w.apply(&tick(1.0, 0)).unwrap();
        let before = w.live_candle("X").cloned();

        let bad = Tick::new("X", 1.0, 0.5, 2.0, 1.0, 1.0, 1_000);
        assert!(matches!(w.apply(&bad), Err(ValidationError::HighBelowLow { .. })));
        let bad = Tick::new("X", f64::NAN, 1.0, 1.0, 1.0, 1.0, 1_000);
        assert!(w.apply(&bad).is_err());

        assert_eq!(w.live_candle("X").cloned(), before);
        assert_eq!(w.stats().rejected, 2);
        assert_eq!(w.stats().accepted, 1);
    }

    #[test]
    fn test_stale_tick_rejected() {
        let mut w = windower();
        w.apply(&tick(1.0, 10_000)).unwrap();

        let err = w.apply(&tick(2.0, 4_000)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::StaleTick {
                instrument: "X".to_string(),
                tick_window: 0,
                live_window: 10_000,
            }
        );
        assert_eq!(w.live_candle("X").unwrap().close, 1.0);
    }

    #[test]
    fn test_duplicate_tick_re_extends_window() {
        let mut w = windower();
        w.apply(&tick(1.0, 0)).unwrap();
        w.apply(&tick(1.0, 0)).unwrap();
        assert_eq!(w.live_candle("X").unwrap().volume, 2.0);
    }

    #[test]
    fn test_instruments_are_independent() {
        let mut w = windower();
        w.apply(&tick(1.0, 10_000)).unwrap();
        let other = Tick::new("Y", 5.0, 5.0, 5.0, 5.0, 0.0, 0);
        assert!(w.apply(&other).is_ok());
        assert_eq!(w.stats().live_instruments, 2);
    }

    #[test]
    fn test_close_idle_keeps_continuity() {
        let mut w = windower();
        w.apply(&tick(1.0, 0)).unwrap();
        w.apply(&tick(1.5, 1_000)).unwrap();

        assert!(w.close_idle(9_999).is_empty());
        let closed = w.close_idle(10_000);
        assert_eq!(closed.len(), 1);
        assert!(w.live_candle("X").unwrap().is_closed);

        // A late tick for the closed window is refused
        assert!(matches!(w.apply(&tick(9.0, 2_000)), Err(ValidationError::StaleTick { .. })));

        let update = w.apply(&tick(2.0, 20_000)).unwrap();
        assert!(update.closed.is_none());
        assert_eq!(update.live.open, 1.5);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut w = TickWindower::new(
            Feed::Crypto,
            WindowerConfig {
                history_capacity: 3,
                ..Default::default()
            },
        );
        for i in 0..10 {
            w.apply(&tick(i as f64 + 1.0, i * 5_000)).unwrap();
        }
        let starts: Vec<i64> = w.history().map(|c| c.window_start).collect();
        assert_eq!(starts, vec![30_000, 35_000, 40_000]);
    }

    #[tokio::test]
    async fn test_publishes_prices() {
        let mut w = windower();
        let mut rx = w.subscribe_prices();
        w.apply(&tick(1.25, 3_000)).unwrap();

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.price, 1.25);
        assert_eq!(sample.observed_at_ms, 3_000);
        assert_eq!(sample.provenance, PriceProvenance::LiveStream);
    }

    #[tokio::test]
    async fn test_run_persists_through_writer() {
        let storage = Arc::new(QuoteStorage::new_in_memory().unwrap());
        let (sink, writer) = CandleWriter::spawn(Arc::clone(&storage), 64);
        let w = TickWindower::new(Feed::Otc, WindowerConfig::default()).with_sink(sink);

        let base = 1_700_000_000_000;

        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(w.run(rx));
        for (close, t) in [(1.0, 0), (1.2, 1_000), (1.1, 6_000)] {
            tx.send(tick(close, base + t)).await.unwrap();
        }
        drop(tx);
        run.await.unwrap();
        writer.await.unwrap();

        let first = storage.get_candle("X", base).unwrap().unwrap();
        assert!(first.is_closed);
        assert_eq!(first.close, 1.2);
        let second = storage.get_candle("X", base + 5_000).unwrap().unwrap();
        assert!(!second.is_closed);
        assert_eq!(second.open, 1.2);
    }
}
