//! Core types for the quotes and settlement engine
//!
//! This crate defines the shared data structures used across the engine:
//! ticks, candles and timeframes, price samples, contracts and balances,
//! and the feed/instrument catalog.

pub mod account;
pub mod candle;
pub mod contract;
pub mod error;
pub mod instrument;
pub mod price;
pub mod tick;

pub use account::Balances;
pub use candle::{window_start, Candle, Timeframe, BASE_GRANULARITY_MS};
pub use contract::{
    new_contract_id, AccountKind, Contract, ContractStatus, Direction, Resolution, RETURN_EPSILON,
};
pub use error::ValidationError;
pub use instrument::{Feed, InstrumentCatalog};
pub use price::{PriceProvenance, PriceSample};
pub use tick::Tick;
