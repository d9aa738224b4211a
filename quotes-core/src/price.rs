//! Price samples handed out by the price service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a price came from. Always surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceProvenance {
    /// Published by a tick windower as the tick arrived
    LiveStream,
    /// Served from the price service's in-memory cache
    LiveCache,
    /// Latest persisted candle, used when the cache was empty or stale
    Persisted,
    /// Persisted candle whose window lies within the requested tolerance
    WindowedMatch,
    /// Most recent persisted candle, outside the requested tolerance
    NearestAvailable,
    /// No history at all, so the current price stood in
    CurrentPriceFallback,
}

impl PriceProvenance {
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            PriceProvenance::NearestAvailable | PriceProvenance::CurrentPriceFallback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceProvenance::LiveStream => "live_stream",
            PriceProvenance::LiveCache => "live_cache",
            PriceProvenance::Persisted => "persisted",
            PriceProvenance::WindowedMatch => "windowed_match",
            PriceProvenance::NearestAvailable => "nearest_available",
            PriceProvenance::CurrentPriceFallback => "current_price_fallback",
        }
    }
}

impl fmt::Display for PriceProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instrument's price at an instant, with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub instrument: String,
    pub price: f64,
    pub observed_at_ms: i64,
    pub provenance: PriceProvenance,
    /// Distance between the requested and the observed instant, when a
    /// specific instant was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_diff_ms: Option<i64>,
}

impl PriceSample {
    pub fn new(
        instrument: impl Into<String>,
        price: f64,
        observed_at_ms: i64,
        provenance: PriceProvenance,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            observed_at_ms,
            provenance,
            time_diff_ms: None,
        }
    }

    /// Same sample relabelled, with the distance to `requested_ms` recorded
    pub fn relative_to(mut self, requested_ms: i64, provenance: PriceProvenance) -> Self {
        self.time_diff_ms = Some((self.observed_at_ms - requested_ms).abs());
        self.provenance = provenance;
        self
    }

    /// Age of the sample at `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.observed_at_ms
    }

    /// Finite and strictly positive
    pub fn is_usable(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}
