//! Error types for the core data model

use thiserror::Error;

/// Rejection of a malformed tick, request or aggregation input.
///
/// These never mutate state: the caller drops the offending input, logs it
/// and carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Non-finite price for {instrument}: o={open} h={high} l={low} c={close}")]
    NonFinitePrice {
        instrument: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("High below low for {instrument}: h={high} l={low}")]
    HighBelowLow {
        instrument: String,
        high: f64,
        low: f64,
    },

    #[error("Invalid volume for {instrument}: {volume}")]
    InvalidVolume { instrument: String, volume: f64 },

    #[error("Stale tick for {instrument}: window {tick_window} behind live window {live_window}")]
    StaleTick {
        instrument: String,
        tick_window: i64,
        live_window: i64,
    },

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Unsupported timeframe: {0} (supported: s5, s10, s15, s30, m1, m5, m15)")]
    UnsupportedTimeframe(String),

    #[error("Cannot aggregate an empty group of candles")]
    EmptyGroup,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ValidationError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ValidationError::InvalidRequest(msg.into())
    }
}
