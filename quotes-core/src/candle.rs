//! OHLC candles and timeframes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Width of every persisted candle, in milliseconds
pub const BASE_GRANULARITY_MS: i64 = 5_000;

/// Start of the window of width `granularity_ms` containing `timestamp_ms`
pub fn window_start(timestamp_ms: i64, granularity_ms: i64) -> i64 {
    timestamp_ms.div_euclid(granularity_ms) * granularity_ms
}

/// One OHLC record for one instrument over one fixed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub instrument: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Inclusive window start, epoch millis
    pub window_start: i64,
    /// Exclusive window end, `window_start + base_granularity_ms`
    pub window_end: i64,
    pub base_granularity_ms: i64,
    pub is_closed: bool,
}

impl Candle {
    /// Open a live candle for the window starting at `window_start`.
    ///
    /// High and low are widened to cover `open` and `close` so the candle is
    /// well formed from its first tick.
    #[allow(clippy::too_many_arguments)]
    pub fn open_window(
        instrument: impl Into<String>,
        window_start: i64,
        granularity_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            open,
            high: open.max(high).max(close),
            low: open.min(low).min(close),
            close,
            volume,
            window_start,
            window_end: window_start + granularity_ms,
            base_granularity_ms: granularity_ms,
            is_closed: false,
        }
    }

    /// Whether `timestamp_ms` falls inside `[window_start, window_end)`
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.window_start && timestamp_ms < self.window_end
    }

    /// OHLC invariants: high covers open and close, low is below both
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0.0
            && self.window_end == self.window_start + self.base_granularity_ms
    }
}

/// Chart timeframes, each an integer multiple of the 5s base window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "s5")]
    FiveSeconds,
    #[serde(rename = "s10")]
    TenSeconds,
    #[serde(rename = "s15")]
    FifteenSeconds,
    #[serde(rename = "s30")]
    ThirtySeconds,
    #[serde(rename = "m1")]
    OneMinute,
    #[serde(rename = "m5")]
    FiveMinutes,
    #[serde(rename = "m15")]
    FifteenMinutes,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::FiveSeconds,
        Timeframe::TenSeconds,
        Timeframe::FifteenSeconds,
        Timeframe::ThirtySeconds,
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
    ];

    /// Number of base candles that make up one candle of this timeframe
    pub fn multiple(&self) -> i64 {
        match self {
            Timeframe::FiveSeconds => 1,
            Timeframe::TenSeconds => 2,
            Timeframe::FifteenSeconds => 3,
            Timeframe::ThirtySeconds => 6,
            Timeframe::OneMinute => 12,
            Timeframe::FiveMinutes => 60,
            Timeframe::FifteenMinutes => 180,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.multiple() * BASE_GRANULARITY_MS
    }

    pub fn token(&self) -> &'static str {
        match self {
            Timeframe::FiveSeconds => "s5",
            Timeframe::TenSeconds => "s10",
            Timeframe::FifteenSeconds => "s15",
            Timeframe::ThirtySeconds => "s30",
            Timeframe::OneMinute => "m1",
            Timeframe::FiveMinutes => "m5",
            Timeframe::FifteenMinutes => "m15",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::FiveSeconds
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.token() == s)
            .ok_or_else(|| ValidationError::UnsupportedTimeframe(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_alignment() {
        assert_eq!(window_start(0, BASE_GRANULARITY_MS), 0);
        assert_eq!(window_start(4_999, BASE_GRANULARITY_MS), 0);
        assert_eq!(window_start(5_000, BASE_GRANULARITY_MS), 5_000);
        assert_eq!(window_start(1_700_000_003_217, BASE_GRANULARITY_MS), 1_700_000_000_000);
        assert_eq!(window_start(-1, BASE_GRANULARITY_MS), -5_000);
    }

    #[test]
    fn test_open_window_widens_range() {
        let candle =
            Candle::open_window("EUR/USD", 5_000, BASE_GRANULARITY_MS, 1.10, 1.09, 1.08, 1.11, 3.0);
        assert_eq!(candle.high, 1.11);
        assert_eq!(candle.low, 1.08);
        assert_eq!(candle.window_end, 10_000);
        assert!(!candle.is_closed);
        assert!(candle.is_well_formed());
        assert!(candle.contains(9_999));
        assert!(!candle.contains(10_000));
    }

    #[test]
    fn test_timeframe_tokens() {
        assert_eq!("m1".parse::<Timeframe>().unwrap(), Timeframe::OneMinute);
        assert_eq!("s30".parse::<Timeframe>().unwrap().multiple(), 6);
        assert_eq!(Timeframe::FifteenMinutes.duration_ms(), 900_000);
        assert_eq!(
            "h1".parse::<Timeframe>(),
            Err(ValidationError::UnsupportedTimeframe("h1".to_string()))
        );
    }
}
