//! Raw price ticks from the upstream feeds

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single price update for one instrument at one instant.
///
/// Feeds deliver one-second aggregates, so a tick carries its own OHLC and a
/// volume delta rather than a single trade price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub instrument: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_delta: f64,
    pub tick_time_ms: i64,
}

impl Tick {
    pub fn new(
        instrument: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume_delta: f64,
        tick_time_ms: i64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            open,
            high,
            low,
            close,
            volume_delta,
            tick_time_ms,
        }
    }

    /// Tick where every price field equals `price`
    pub fn flat(
        instrument: impl Into<String>,
        price: f64,
        volume_delta: f64,
        tick_time_ms: i64,
    ) -> Self {
        Self::new(instrument, price, price, price, price, volume_delta, tick_time_ms)
    }

    /// Boundary validation: finite prices, `high >= low`, finite non-negative volume
    pub fn validate(&self) -> Result<(), ValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(ValidationError::NonFinitePrice {
                instrument: self.instrument.clone(),
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(ValidationError::HighBelowLow {
                instrument: self.instrument.clone(),
                high: self.high,
                low: self.low,
            });
        }

        if !self.volume_delta.is_finite() || self.volume_delta < 0.0 {
            return Err(ValidationError::InvalidVolume {
                instrument: self.instrument.clone(),
                volume: self.volume_delta,
            });
        }

        Ok(())
    }
}
