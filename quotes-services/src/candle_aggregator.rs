//! Candle Aggregator
//!
//! Groups consecutive 5-second base candles into coarser windows. Pure and
//! stateless: the same input always yields the same output.

use quotes_core::{window_start, Candle, Timeframe, ValidationError, BASE_GRANULARITY_MS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A derived, never persisted candle covering `multiple` base windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCandle {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub window_start: i64,
    pub window_end: i64,
    /// Closed only when every member candle is closed
    pub is_closed: bool,
    /// Number of base candles folded into this one
    pub member_count: usize,
}

/// Aggregate base candles of one instrument to `timeframe`.
///
/// Returns one candle per coarse window present in the input, ascending by
/// window start. An empty input yields an empty output.
pub fn aggregate(
    candles: &[Candle],
    timeframe: Timeframe,
) -> Result<Vec<AggregatedCandle>, ValidationError> {
    let bucket_ms = timeframe.multiple() * BASE_GRANULARITY_MS;

    let mut buckets: BTreeMap<i64, Vec<&Candle>> = BTreeMap::new();
    for candle in candles {
        buckets
            .entry(window_start(candle.window_start, bucket_ms))
            .or_default()
            .push(candle);
    }

    buckets
        .into_iter()
        .map(|(bucket_start, members)| aggregate_group(&members, bucket_start, timeframe))
        .collect()
}

/// Aggregate using a timeframe token such as `m1`. Unknown tokens are rejected.
pub fn aggregate_token(
    candles: &[Candle],
    token: &str,
) -> Result<Vec<AggregatedCandle>, ValidationError> {
    aggregate(candles, token.parse()?)
}

/// Fold one non-empty group of base candles into a single aggregated candle
pub fn aggregate_group(
    members: &[&Candle],
    bucket_start: i64,
    timeframe: Timeframe,
) -> Result<AggregatedCandle, ValidationError> {
    let mut sorted: Vec<&Candle> = members.to_vec();
    sorted.sort_by_key(|c| c.window_start);

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(ValidationError::EmptyGroup),
    };

    let high = sorted.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = sorted.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let volume = sorted.iter().map(|c| c.volume).sum();

    Ok(AggregatedCandle {
        instrument: first.instrument.clone(),
        timeframe,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        window_start: bucket_start,
        window_end: bucket_start + timeframe.duration_ms(),
        is_closed: sorted.iter().all(|c| c.is_closed),
        member_count: sorted.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(window_start: i64, open: f64, high: f64, low: f64, close: f64, closed: bool) -> Candle {
        let mut c = Candle::open_window(
            "EUR/USD",
            window_start,
            BASE_GRANULARITY_MS,
            open,
            high,
            low,
            close,
            2.0,
        );
        c.is_closed = closed;
        c
    }

    #[test]
    fn test_aggregate_s15() {
        let candles = vec![
            base(0, 1.0, 1.5, 0.9, 1.2, true),
            base(5_000, 1.2, 1.8, 1.1, 1.3, true),
            base(10_000, 1.3, 1.4, 0.7, 1.0, true),
            base(15_000, 1.0, 1.1, 0.95, 1.05, false),
        ];

        let out = aggregate(&candles, Timeframe::FifteenSeconds).unwrap();
        assert_eq!(out.len(), 2);

        let first = &out[0];
        assert_eq!(first.window_start, 0);
        assert_eq!(first.window_end, 15_000);
        assert_eq!(first.open, 1.0);
        assert_eq!(first.close, 1.0);
        assert_eq!(first.high, 1.8);
        assert_eq!(first.low, 0.7);
        assert_eq!(first.volume, 6.0);
        assert_eq!(first.member_count, 3);
        assert!(first.is_closed);

        let second = &out[1];
        assert_eq!(second.window_start, 15_000);
        assert!(!second.is_closed);
    }

    #[test]
    fn test_unordered_input_is_sorted() {
        let candles = vec![
            base(20_000, 3.0, 3.0, 3.0, 3.0, true),
            base(5_000, 2.0, 2.0, 2.0, 2.0, true),
            base(0, 1.0, 1.0, 1.0, 1.0, true),
        ];

        let out = aggregate(&candles, Timeframe::TenSeconds).unwrap();
        let starts: Vec<i64> = out.iter().map(|c| c.window_start).collect();
        assert_eq!(starts, vec![0, 20_000]);
        assert_eq!(out[0].open, 1.0);
        assert_eq!(out[0].close, 2.0);
    }

    #[test]
    fn test_s5_is_identity_shaped() {
        let candles = vec![
            base(0, 1.0, 1.1, 0.9, 1.05, true),
            base(5_000, 1.05, 1.2, 1.0, 1.1, true),
        ];
        let out = aggregate(&candles, Timeframe::FiveSeconds).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].open, 1.05);
        assert_eq!(out[1].window_end, 10_000);
    }

    #[test]
    fn test_is_idempotent() {
        let candles = vec![
            base(0, 1.0, 1.1, 0.9, 1.05, true),
            base(5_000, 1.05, 1.2, 1.0, 1.1, true),
        ];
        assert_eq!(
            aggregate(&candles, Timeframe::OneMinute).unwrap(),
            aggregate(&candles, Timeframe::OneMinute).unwrap()
        );
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = aggregate_group(&[], 0, Timeframe::OneMinute).unwrap_err();
        assert_eq!(err, ValidationError::EmptyGroup);
        assert!(aggregate(&[], Timeframe::OneMinute).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_token_rejected() {
        let candles = vec![base(0, 1.0, 1.0, 1.0, 1.0, true)];
        assert!(matches!(
            aggregate_token(&candles, "h4"),
            Err(ValidationError::UnsupportedTimeframe(_))
        ));
        assert_eq!(aggregate_token(&candles, "m5").unwrap().len(), 1);
    }
}
