//! Settlement Worker
//!
//! Periodically finds active contracts whose expiry has passed, prices them
//! at expiry and commits the outcome together with the owner's balance
//! credit. A per-contract in-flight marker keeps overlapping passes from
//! settling the same contract twice; the store's `status = 'active'` guard
//! backs it up.

use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use quotes_core::{Contract, ValidationError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::balance_cache::BalanceCache;
use crate::notifications::{BalanceUpdate, NotificationSink, BALANCE_UPDATED, CONTRACT_UPDATED};
use crate::price_service::{PriceError, PriceService, DEFAULT_PRICE_TOLERANCE_MS};
use crate::storage::{QuoteStorage, SettleOutcome, StorageError};

/// Configuration for the settlement worker
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How often to look for expired contracts
    pub check_interval: Duration,
    /// Maximum contracts per pass
    pub batch_size: usize,
    /// Tolerance when pricing a contract at its expiry
    pub price_tolerance_ms: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            batch_size: 100,
            price_tolerance_ms: DEFAULT_PRICE_TOLERANCE_MS,
        }
    }
}

/// Summary of one `process_expired` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub scanned: usize,
    pub settled: usize,
    /// Claimed by another pass or already terminal
    pub skipped: usize,
    pub failed: usize,
}

/// Lifecycle snapshot for the hosting application
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub is_running: bool,
    pub check_interval_ms: u64,
    pub in_flight: usize,
    pub settled_total: u64,
    pub failed_total: u64,
}

struct WorkerControl {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Removes a contract id from the in-flight set when dropped
struct InFlightGuard<'a> {
    set: &'a DashSet<String>,
    contract_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.contract_id);
    }
}

pub struct SettlementWorker {
    storage: Arc<QuoteStorage>,
    prices: Arc<PriceService>,
    balances: Arc<BalanceCache>,
    notifier: Arc<dyn NotificationSink>,
    config: SettlementConfig,
    in_flight: DashSet<String>,
    stopping: AtomicBool,
    settled_total: AtomicU64,
    failed_total: AtomicU64,
    control: Mutex<Option<WorkerControl>>,
}

impl SettlementWorker {
    pub fn new(
        storage: Arc<QuoteStorage>,
        prices: Arc<PriceService>,
        balances: Arc<BalanceCache>,
        notifier: Arc<dyn NotificationSink>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            storage,
            prices,
            balances,
            notifier,
            config,
            in_flight: DashSet::new(),
            stopping: AtomicBool::new(false),
            settled_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            control: Mutex::new(None),
        }
    }

    /// Start the scheduler. Returns `false` if it is already running.
    ///
    /// Each tick spawns one pass on the blocking pool, so a slow pass never
    /// delays the next tick; the in-flight set keeps passes apart.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut control = self.control.lock();
        if control.is_some() {
            return false;
        }

        self.stopping.store(false, Ordering::SeqCst);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        *control = Some(WorkerControl { shutdown, handle });
        info!(
            "[Settlement] Worker started (every {:?}, batch {})",
            self.config.check_interval, self.config.batch_size
        );
        true
    }

    /// Stop the scheduler and wait for in-progress passes to finish.
    ///
    /// Passes stop picking up new contracts once stopping; a contract already
    /// inside its transaction always completes.
    pub async fn stop(&self) {
        let control = self.control.lock().take();
        let Some(control) = control else {
            return;
        };

        self.stopping.store(true, Ordering::SeqCst);
        let _ = control.shutdown.send(true);
        if let Err(e) = control.handle.await {
            error!("[Settlement] Scheduler task failed: {}", e);
        }
        info!("[Settlement] Worker stopped");
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            is_running: self.control.lock().is_some(),
            check_interval_ms: self.config.check_interval.as_millis() as u64,
            in_flight: self.in_flight.len(),
            settled_total: self.settled_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes: JoinSet<SettlementReport> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while let Some(finished) = passes.try_join_next() {
                        if let Err(e) = finished {
                            error!("[Settlement] Pass panicked: {}", e);
                        }
                    }
                    let worker = Arc::clone(&self);
                    passes.spawn_blocking(move || worker.process_expired());
                }
                _ = shutdown.changed() => break,
            }
        }

        while let Some(finished) = passes.join_next().await {
            if let Err(e) = finished {
                error!("[Settlement] Pass panicked: {}", e);
            }
        }
    }

    /// Settle every expired active contract in one bounded batch
    pub fn process_expired(&self) -> SettlementReport {
        self.process_expired_at(Utc::now().timestamp_millis())
    }

    /// `process_expired` with an explicit notion of "now"
    pub fn process_expired_at(&self, now_ms: i64) -> SettlementReport {
        let mut report = SettlementReport::default();

        let contracts = match self
            .storage
            .expired_active_contracts(now_ms, self.config.batch_size)
        {
            Ok(contracts) => contracts,
            Err(e) => {
                error!("[Settlement] Failed to load expired contracts: {}", e);
                return report;
            }
        };
        report.scanned = contracts.len();

        for contract in &contracts {
            if self.stopping.load(Ordering::SeqCst) {
                debug!("[Settlement] Stopping, leaving remaining contracts for the next run");
                break;
            }

            let Some(_guard) = self.claim(&contract.contract_id) else {
                report.skipped += 1;
                continue;
            };

            match self.settle(contract, now_ms) {
                Ok(()) => {
                    report.settled += 1;
                    self.settled_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(SettlementError::ContractNotActive(_)) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(
                        "[Settlement] Failed to settle contract {}: {}",
                        contract.contract_id, e
                    );
                    report.failed += 1;
                    self.failed_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if report.settled > 0 || report.failed > 0 {
            info!(
                "[Settlement] Pass: {} settled, {} failed, {} skipped",
                report.settled, report.failed, report.skipped
            );
        }
        report
    }

    fn claim(&self, contract_id: &str) -> Option<InFlightGuard<'_>> {
        if self.in_flight.insert(contract_id.to_string()) {
            Some(InFlightGuard {
                set: &self.in_flight,
                contract_id: contract_id.to_string(),
            })
        } else {
            None
        }
    }

    /// Price, resolve and commit one contract, then notify
    fn settle(&self, contract: &Contract, now_ms: i64) -> Result<(), SettlementError> {
        if !self.prices.is_valid_instrument(&contract.instrument) {
            return Err(ValidationError::UnknownInstrument(contract.instrument.clone()).into());
        }

        let sample = self.prices.price_at_as_of(
            &contract.instrument,
            contract.expiry_time_ms,
            self.config.price_tolerance_ms,
            now_ms,
        )?;
        if sample.provenance.is_fallback() {
            warn!(
                "[Settlement] Contract {} priced from {} ({}ms from expiry)",
                contract.contract_id,
                sample.provenance,
                sample.time_diff_ms.unwrap_or_default()
            );
        }

        let resolution = contract.resolve(sample.price);
        let settled = contract.settled(sample.price, now_ms, &resolution);

        let balances = match self.storage.settle_contract(&settled, resolution.credit) {
            Ok(SettleOutcome::Settled { balances }) => balances,
            Ok(SettleOutcome::ContractNotActive) => {
                return Err(SettlementError::ContractNotActive(contract.contract_id.clone()));
            }
            Ok(SettleOutcome::UserNotFound) => {
                return Err(SettlementError::UserNotFound(contract.owner_id.clone()));
            }
            Err(e) => return Err(SettlementError::Transaction(e)),
        };

        info!(
            "[Settlement] Settled contract {} ({} {}): {} @ {} -> {}, profit {}",
            settled.contract_id,
            settled.instrument,
            settled.direction,
            settled.entry_price,
            sample.price,
            settled.status,
            settled.profit
        );

        self.balances.set(&settled.owner_id, balances);
        self.notify(&settled, BalanceUpdate::new(&balances, settled.account, resolution.credit));

        Ok(())
    }

    fn notify(&self, settled: &Contract, update: BalanceUpdate) {
        let events = [
            (CONTRACT_UPDATED, serde_json::to_value(settled)),
            (BALANCE_UPDATED, serde_json::to_value(&update)),
        ];

        for (event, payload) in events {
            let result = payload
                .map_err(Into::into)
                .and_then(|payload| self.notifier.send_to_user(&settled.owner_id, event, payload));
            if let Err(e) = result {
                warn!(
                    "[Settlement] Failed to send {} for contract {}: {}",
                    event, settled.contract_id, e
                );
            }
        }
    }
}

/// Errors from settling a single contract
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Price error: {0}")]
    Price(#[from] PriceError),

    #[error("Settlement transaction failed: {0}")]
    Transaction(#[from] StorageError),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Contract no longer active: {0}")]
    ContractNotActive(String),
}
