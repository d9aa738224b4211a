//! Quote Storage
//!
//! SQLite-backed document store for candles, contracts and user balances.
//! Candle writes are upserts keyed by `(instrument, window_start)` that never
//! touch a closed row; settlement runs inside a single transaction.

use chrono::Utc;
use quotes_core::{AccountKind, Balances, Candle, Contract};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

const CANDLE_COLUMNS: &str = "instrument, open, high, low, close, volume, \
     window_start, window_end, granularity_ms, is_closed";

const CONTRACT_COLUMNS: &str = "contract_id, owner_id, instrument, account, stake, direction, \
     payout_rate, entry_price, entry_time_ms, expiry_time_ms, close_price, close_time_ms, \
     status, profit";

/// Result of an attempted settlement transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Contract and balance were written together
    Settled { balances: Balances },
    /// The contract was no longer active; nothing was written
    ContractNotActive,
    /// The owner does not exist; nothing was written
    UserNotFound,
}

/// Document store using SQLite
pub struct QuoteStorage {
    conn: Mutex<Connection>,
}

impl QuoteStorage {
    /// Create a new QuoteStorage instance
    ///
    /// Creates the database file and tables if they don't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(StorageError::Database)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;

        Ok(storage)
    }

    /// Create an in-memory QuoteStorage (useful for testing)
    pub fn new_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::Database)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;

        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                instrument TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                granularity_ms INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                is_closed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (instrument, window_start)
            );

            CREATE TABLE IF NOT EXISTS contracts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contract_id TEXT NOT NULL UNIQUE,
                owner_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                account TEXT NOT NULL,
                stake TEXT NOT NULL,
                direction TEXT NOT NULL,
                payout_rate TEXT NOT NULL,
                entry_price REAL NOT NULL,
                entry_time_ms INTEGER NOT NULL,
                expiry_time_ms INTEGER NOT NULL,
                close_price REAL,
                close_time_ms INTEGER,
                status TEXT NOT NULL DEFAULT 'active',
                profit TEXT NOT NULL DEFAULT '0'
            );

            CREATE INDEX IF NOT EXISTS idx_contracts_status_expiry
            ON contracts(status, expiry_time_ms);

            CREATE INDEX IF NOT EXISTS idx_contracts_owner
            ON contracts(owner_id);

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                practice_balance TEXT NOT NULL,
                funded_balance TEXT NOT NULL
            );
            "#,
        )
        .map_err(StorageError::Database)?;

        Ok(())
    }

    // ========================================================================
    // Candles
    // ========================================================================

    /// Upsert a candle by `(instrument, window_start)`.
    ///
    /// Returns `false` when the stored row is already closed and was left
    /// untouched.
    pub fn upsert_candle(&self, candle: &Candle) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let changed = conn
            .execute(
                r#"
                INSERT INTO candles (instrument, window_start, window_end, granularity_ms,
                                     open, high, low, close, volume, is_closed, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(instrument, window_start) DO UPDATE SET
                    window_end = excluded.window_end,
                    granularity_ms = excluded.granularity_ms,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    is_closed = excluded.is_closed,
                    updated_at = excluded.updated_at
                WHERE candles.is_closed = 0
                "#,
                params![
                    candle.instrument,
                    candle.window_start,
                    candle.window_end,
                    candle.base_granularity_ms,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                    candle.is_closed,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(StorageError::Database)?;

        Ok(changed > 0)
    }

    /// Get the candle for one window
    pub fn get_candle(
        &self,
        instrument: &str,
        window_start: i64,
    ) -> Result<Option<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            "SELECT {} FROM candles WHERE instrument = ?1 AND window_start = ?2",
            CANDLE_COLUMNS
        );
        conn.query_row(&sql, params![instrument, window_start], row_to_candle)
            .optional()
            .map_err(StorageError::Database)
    }

    /// Most recent candle for an instrument, live or closed
    pub fn latest_candle(&self, instrument: &str) -> Result<Option<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            "SELECT {} FROM candles WHERE instrument = ?1 ORDER BY window_start DESC LIMIT 1",
            CANDLE_COLUMNS
        );
        conn.query_row(&sql, params![instrument], row_to_candle)
            .optional()
            .map_err(StorageError::Database)
    }

    /// Candle whose window overlaps `[ts_ms - tolerance_ms, ts_ms + tolerance_ms]`.
    ///
    /// The window containing `ts_ms` wins; otherwise the latest overlapping one.
    pub fn candle_near(
        &self,
        instrument: &str,
        ts_ms: i64,
        tolerance_ms: i64,
    ) -> Result<Option<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            r#"
            SELECT {} FROM candles
            WHERE instrument = ?1 AND window_start <= ?2 + ?3 AND window_end > ?2 - ?3
            ORDER BY (window_start <= ?2 AND window_end > ?2) DESC, window_start DESC
            LIMIT 1
            "#,
            CANDLE_COLUMNS
        );
        conn.query_row(&sql, params![instrument, ts_ms, tolerance_ms], row_to_candle)
            .optional()
            .map_err(StorageError::Database)
    }

    /// The last `limit` candles for an instrument, oldest first
    pub fn recent_candles(
        &self,
        instrument: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            "SELECT {} FROM candles WHERE instrument = ?1 ORDER BY window_start DESC LIMIT ?2",
            CANDLE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(StorageError::Database)?;
        let mut candles = stmt
            .query_map(params![instrument, limit as i64], row_to_candle)
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        candles.reverse();
        Ok(candles)
    }

    /// Candles whose window starts inside `[from_ms, to_ms)`, oldest first
    pub fn candles_in_range(
        &self,
        instrument: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            r#"
            SELECT {} FROM candles
            WHERE instrument = ?1 AND window_start >= ?2 AND window_start < ?3
            ORDER BY window_start ASC
            "#,
            CANDLE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(StorageError::Database)?;
        let candles = stmt
            .query_map(params![instrument, from_ms, to_ms], row_to_candle)
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(candles)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Insert or replace a user with the given balances
    pub fn insert_user(&self, user_id: &str, balances: &Balances) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO users (user_id, practice_balance, funded_balance)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                user_id,
                balances.practice.to_string(),
                balances.funded.to_string()
            ],
        )
        .map_err(StorageError::Database)?;

        Ok(())
    }

    pub fn user_balances(&self, user_id: &str) -> Result<Option<Balances>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        conn.query_row(
            "SELECT practice_balance, funded_balance FROM users WHERE user_id = ?1",
            params![user_id],
            row_to_balances,
        )
        .optional()
        .map_err(StorageError::Database)
    }

    // ========================================================================
    // Contracts
    // ========================================================================

    /// Store a new contract, returning its storage row id
    pub fn insert_contract(&self, contract: &Contract) -> Result<i64, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        conn.execute(
            r#"
            INSERT INTO contracts (contract_id, owner_id, instrument, account, stake, direction,
                                   payout_rate, entry_price, entry_time_ms, expiry_time_ms,
                                   close_price, close_time_ms, status, profit)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                contract.contract_id,
                contract.owner_id,
                contract.instrument,
                contract.account.as_str(),
                contract.stake.to_string(),
                contract.direction.as_str(),
                contract.payout_rate.to_string(),
                contract.entry_price,
                contract.entry_time_ms,
                contract.expiry_time_ms,
                contract.close_price,
                contract.close_time_ms,
                contract.status.as_str(),
                contract.profit.to_string(),
            ],
        )
        .map_err(StorageError::Database)?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get_contract(&self, contract_id: &str) -> Result<Option<Contract>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            "SELECT {} FROM contracts WHERE contract_id = ?1",
            CONTRACT_COLUMNS
        );
        conn.query_row(&sql, params![contract_id], row_to_contract)
            .optional()
            .map_err(StorageError::Database)
    }

    /// Up to `limit` active contracts whose expiry is at or before `now_ms`,
    /// earliest expiry first
    pub fn expired_active_contracts(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<Contract>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockError)?;

        let sql = format!(
            r#"
            SELECT {} FROM contracts
            WHERE status = 'active' AND expiry_time_ms <= ?1
            ORDER BY expiry_time_ms ASC
            LIMIT ?2
            "#,
            CONTRACT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(StorageError::Database)?;
        let contracts = stmt
            .query_map(params![now_ms, limit as i64], row_to_contract)
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(contracts)
    }

    /// Write a settled contract and credit its owner in one transaction.
    ///
    /// The contract row is only updated while its status is still `active`.
    /// Any early return drops the transaction, which rolls it back.
    pub fn settle_contract(
        &self,
        settled: &Contract,
        credit: Decimal,
    ) -> Result<SettleOutcome, StorageError> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockError)?;
        let tx = conn.transaction().map_err(StorageError::Database)?;

        let updated = tx
            .execute(
                r#"
                UPDATE contracts
                SET close_price = ?1, close_time_ms = ?2, status = ?3, profit = ?4
                WHERE contract_id = ?5 AND status = 'active'
                "#,
                params![
                    settled.close_price,
                    settled.close_time_ms,
                    settled.status.as_str(),
                    settled.profit.to_string(),
                    settled.contract_id,
                ],
            )
            .map_err(StorageError::Database)?;

        if updated == 0 {
            return Ok(SettleOutcome::ContractNotActive);
        }

        let current = tx
            .query_row(
                "SELECT practice_balance, funded_balance FROM users WHERE user_id = ?1",
                params![settled.owner_id],
                row_to_balances,
            )
            .optional()
            .map_err(StorageError::Database)?;

        let Some(mut balances) = current else {
            return Ok(SettleOutcome::UserNotFound);
        };

        balances.credit(settled.account, credit);
        let column = match settled.account {
            AccountKind::Practice => "practice_balance",
            AccountKind::Funded => "funded_balance",
        };
        tx.execute(
            &format!("UPDATE users SET {} = ?1 WHERE user_id = ?2", column),
            params![balances.get(settled.account).to_string(), settled.owner_id],
        )
        .map_err(StorageError::Database)?;

        tx.commit().map_err(StorageError::Database)?;

        Ok(SettleOutcome::Settled { balances })
    }
}

fn row_to_candle(row: &Row<'_>) -> rusqlite::Result<Candle> {
    Ok(Candle {
        instrument: row.get(0)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
        window_start: row.get(6)?,
        window_end: row.get(7)?,
        base_granularity_ms: row.get(8)?,
        is_closed: row.get(9)?,
    })
}

fn row_to_balances(row: &Row<'_>) -> rusqlite::Result<Balances> {
    Ok(Balances {
        practice: parse_column(row, 0)?,
        funded: parse_column(row, 1)?,
    })
}

fn row_to_contract(row: &Row<'_>) -> rusqlite::Result<Contract> {
    Ok(Contract {
        contract_id: row.get(0)?,
        owner_id: row.get(1)?,
        instrument: row.get(2)?,
        account: parse_column(row, 3)?,
        stake: parse_column(row, 4)?,
        direction: parse_column(row, 5)?,
        payout_rate: parse_column(row, 6)?,
        entry_price: row.get(7)?,
        entry_time_ms: row.get(8)?,
        expiry_time_ms: row.get(9)?,
        close_price: row.get(10)?,
        close_time_ms: row.get(11)?,
        status: parse_column(row, 12)?,
        profit: parse_column(row, 13)?,
    })
}

/// Read a text column and parse it, surfacing bad data as a conversion error
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire lock")]
    LockError,
}
