//! Candle Writer
//!
//! Background task that drains candle upserts from the windowers into the
//! store. Submission never blocks the tick path: when the queue is full the
//! write is dropped and logged.

use quotes_core::Candle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::QuoteStorage;

/// Default queue depth between a windower and its writer
pub const DEFAULT_WRITE_QUEUE: usize = 4_096;

/// Sending half handed to a windower
#[derive(Debug, Clone)]
pub struct CandleSink {
    tx: mpsc::Sender<Candle>,
}

impl CandleSink {
    /// Queue a candle for persistence. Returns `false` if it was dropped.
    pub fn submit(&self, candle: Candle) -> bool {
        match self.tx.try_send(candle) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(candle)) => {
                warn!(
                    "[CandleWriter] Write queue full, dropping {} @ {}",
                    candle.instrument, candle.window_start
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(candle)) => {
                warn!(
                    "[CandleWriter] Stopped, dropping {} @ {}",
                    candle.instrument, candle.window_start
                );
                false
            }
        }
    }
}

pub struct CandleWriter;

impl CandleWriter {
    /// Spawn the writer task.
    ///
    /// The task exits once every sink has been dropped and the queue is
    /// drained; its handle yields the number of rows written.
    pub fn spawn(storage: Arc<QuoteStorage>, capacity: usize) -> (CandleSink, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::channel::<Candle>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(candle) = rx.recv().await {
                match storage.upsert_candle(&candle) {
                    Ok(true) => written += 1,
                    Ok(false) => debug!(
                        "[CandleWriter] Skipped write to closed candle {} @ {}",
                        candle.instrument, candle.window_start
                    ),
                    Err(e) => warn!(
                        "[CandleWriter] Failed to persist candle {} @ {}: {}",
                        candle.instrument, candle.window_start, e
                    ),
                }
            }
            info!("[CandleWriter] Stopped after {} writes", written);
            written
        });

        (CandleSink { tx }, handle)
    }
}
