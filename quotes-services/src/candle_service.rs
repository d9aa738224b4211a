//! Candle Service
//!
//! Read helper that serves multi-timeframe chart data from persisted base candles.

use quotes_core::{Timeframe, ValidationError};
use std::sync::Arc;

use crate::candle_aggregator::{aggregate, AggregatedCandle};
use crate::storage::{QuoteStorage, StorageError};

/// Upper bound on candles returned by a single chart request
pub const MAX_CHART_CANDLES: usize = 1_000;

/// Service for building chart candles from stored base candles
pub struct CandleService {
    storage: Arc<QuoteStorage>,
}

impl CandleService {
    pub fn new(storage: Arc<QuoteStorage>) -> Self {
        Self { storage }
    }

    /// The last `limit` candles of `instrument` at the timeframe named by `token`.
    ///
    /// Loads `limit × multiple` base candles, live ones included, so the most
    /// recent aggregated candle may still be open.
    pub fn chart(
        &self,
        instrument: &str,
        token: &str,
        limit: usize,
    ) -> Result<Vec<AggregatedCandle>, CandleServiceError> {
        let timeframe: Timeframe = token.parse()?;
        if limit == 0 || limit > MAX_CHART_CANDLES {
            return Err(ValidationError::invalid_request(format!(
                "limit must be between 1 and {}",
                MAX_CHART_CANDLES
            ))
            .into());
        }

        let base_count = limit * timeframe.multiple() as usize;
        let base = self.storage.recent_candles(instrument, base_count)?;

        let mut candles = aggregate(&base, timeframe)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }

        Ok(candles)
    }

    /// Candles between two instants at the given timeframe
    pub fn range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<AggregatedCandle>, CandleServiceError> {
        if from_ms >= to_ms {
            return Err(CandleServiceError::InvalidTimeRange);
        }

        let base = self.storage.candles_in_range(instrument, from_ms, to_ms)?;
        Ok(aggregate(&base, timeframe)?)
    }
}

/// Errors that can occur during candle operations
#[derive(Debug, thiserror::Error)]
pub enum CandleServiceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid time range")]
    InvalidTimeRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotes_core::Candle;

    fn store_candles(storage: &QuoteStorage, count: i64) {
        for i in 0..count {
            let price = 100.0 + i as f64;
            let mut candle = Candle::open_window(
                "BTC/USD",
                i * 5_000,
                5_000,
                price,
                price + 1.0,
                price - 1.0,
                price + 0.5,
                1.0,
            );
            candle.is_closed = i < count - 1;
            storage.upsert_candle(&candle).unwrap();
        }
    }

    #[test]
    fn test_chart_aggregates_latest_windows() {
        let storage = Arc::new(QuoteStorage::new_in_memory().unwrap());
        store_candles(&storage, 24);
        let service = CandleService::new(storage);

        let candles = service.chart("BTC/USD", "s30", 2).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].window_start, 60_000);
        assert_eq!(candles[1].window_start, 90_000);
        assert_eq!(candles[1].member_count, 6);
        assert!(candles[0].is_closed);
        assert!(!candles[1].is_closed);
    }

    #[test]
    fn test_chart_s5_returns_base_candles() {
        let storage = Arc::new(QuoteStorage::new_in_memory().unwrap());
        store_candles(&storage, 5);
        let service = CandleService::new(storage);

        let candles = service.chart("BTC/USD", "s5", 3).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[2].window_start, 20_000);
        assert_eq!(candles[2].member_count, 1);
    }

    #[test]
    fn test_chart_rejects_bad_input() {
        let storage = Arc::new(QuoteStorage::new_in_memory().unwrap());
        let service = CandleService::new(storage);

        assert!(matches!(
            service.chart("BTC/USD", "h1", 10),
            Err(CandleServiceError::Validation(ValidationError::UnsupportedTimeframe(_)))
        ));
        assert!(matches!(
            service.chart("BTC/USD", "m1", 0),
            Err(CandleServiceError::Validation(ValidationError::InvalidRequest(_)))
        ));
        assert!(service.chart("BTC/USD", "m1", 10).unwrap().is_empty());
    }

    #[test]
    fn test_range() {
        let storage = Arc::new(QuoteStorage::new_in_memory().unwrap());
        store_candles(&storage, 12);
        let service = CandleService::new(storage);

        let candles = service.range("BTC/USD", Timeframe::OneMinute, 0, 60_000).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[0].close, 111.5);

        assert!(matches!(
            service.range("BTC/USD", Timeframe::OneMinute, 10, 10),
            Err(CandleServiceError::InvalidTimeRange)
        ));
    }
}
