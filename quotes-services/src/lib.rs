//! Business logic services for the quotes and settlement engine
//!
//! This crate turns relay ticks into persisted candles, serves current and
//! historical prices, and settles expired contracts against those prices.

pub mod balance_cache;
pub mod candle_aggregator;
pub mod candle_service;
pub mod candle_writer;
pub mod notifications;
pub mod price_service;
pub mod relay;
pub mod settlement;
pub mod storage;
pub mod windower;

pub use balance_cache::{BalanceCache, BalanceCacheStats, BALANCE_TTL};
pub use candle_aggregator::{aggregate, aggregate_group, aggregate_token, AggregatedCandle};
pub use candle_service::{CandleService, CandleServiceError};
pub use candle_writer::{CandleSink, CandleWriter, DEFAULT_WRITE_QUEUE};
pub use notifications::{
    BalanceUpdate, NotificationError, NotificationSink, UserEvent, UserEventHub, BALANCE_UPDATED,
    CONTRACT_UPDATED,
};
pub use price_service::{
    CachedPrice, PriceCacheStats, PriceError, PriceService, PriceServiceConfig,
    DEFAULT_PRICE_TOLERANCE_MS,
};
pub use relay::{parse_relay_frame, RelayConfig, RelayFeedClient, RelayMessage};
pub use settlement::{
    SettlementConfig, SettlementError, SettlementReport, SettlementWorker, WorkerStatus,
};
pub use storage::{QuoteStorage, SettleOutcome, StorageError};
pub use windower::{TickWindower, WindowUpdate, WindowerConfig, WindowerStats};
