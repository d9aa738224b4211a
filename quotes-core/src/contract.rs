//! Binary-outcome contracts and their resolution

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Price moves smaller than this resolve a contract as returned
pub const RETURN_EPSILON: f64 = 0.00001;

/// Which way the holder bet the price would move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "call" => Ok(Direction::Up),
            "down" | "put" => Ok(Direction::Down),
            _ => Err(ValidationError::invalid_request(format!("unknown direction: {s}"))),
        }
    }
}

/// Account partition a contract debits and credits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Practice,
    Funded,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Practice => "practice",
            AccountKind::Funded => "funded",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "practice" | "demo" => Ok(AccountKind::Practice),
            "funded" | "real" => Ok(AccountKind::Funded),
            _ => Err(ValidationError::invalid_request(format!("unknown account: {s}"))),
        }
    }
}

/// Lifecycle of a contract. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Won,
    Lost,
    Returned,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Won => "won",
            ContractStatus::Lost => "lost",
            ContractStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContractStatus::Active)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ContractStatus::Active),
            "won" => Ok(ContractStatus::Won),
            "lost" => Ok(ContractStatus::Lost),
            "returned" => Ok(ContractStatus::Returned),
            _ => Err(ValidationError::invalid_request(format!("unknown status: {s}"))),
        }
    }
}

/// A user's bet on an instrument's direction over a fixed horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Externally visible id, distinct from the storage row id
    pub contract_id: String,
    pub owner_id: String,
    pub instrument: String,
    pub account: AccountKind,
    pub stake: Decimal,
    pub direction: Direction,
    /// Payout as a percentage of the stake
    pub payout_rate: Decimal,
    pub entry_price: f64,
    pub entry_time_ms: i64,
    pub expiry_time_ms: i64,
    pub close_price: Option<f64>,
    pub close_time_ms: Option<i64>,
    pub status: ContractStatus,
    pub profit: Decimal,
}

/// Outcome of resolving a contract against a close price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub status: ContractStatus,
    /// Signed profit recorded on the contract
    pub profit: Decimal,
    /// Amount credited back to the owner's account partition
    pub credit: Decimal,
}

impl Contract {
    /// Open an active contract expiring `horizon_ms` after entry
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        owner_id: impl Into<String>,
        instrument: impl Into<String>,
        account: AccountKind,
        stake: Decimal,
        direction: Direction,
        payout_rate: Decimal,
        entry_price: f64,
        entry_time_ms: i64,
        horizon_ms: i64,
    ) -> Result<Self, ValidationError> {
        if stake <= Decimal::ZERO {
            return Err(ValidationError::invalid_request("stake must be positive"));
        }
        if payout_rate < Decimal::ZERO {
            return Err(ValidationError::invalid_request("payout rate must not be negative"));
        }
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(ValidationError::invalid_request("entry price must be positive"));
        }
        if horizon_ms <= 0 {
            return Err(ValidationError::invalid_request("horizon must be positive"));
        }

        Ok(Self {
            contract_id: new_contract_id(),
            owner_id: owner_id.into(),
            instrument: instrument.into(),
            account,
            stake,
            direction,
            payout_rate,
            entry_price,
            entry_time_ms,
            expiry_time_ms: entry_time_ms + horizon_ms,
            close_price: None,
            close_time_ms: None,
            status: ContractStatus::Active,
            profit: Decimal::ZERO,
        })
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_time_ms <= now_ms
    }

    /// Resolve the outcome for `close_price`. Pure; does not mutate.
    pub fn resolve(&self, close_price: f64) -> Resolution {
        if (close_price - self.entry_price).abs() < RETURN_EPSILON {
            return Resolution {
                status: ContractStatus::Returned,
                profit: Decimal::ZERO,
                credit: self.stake,
            };
        }

        let won = match self.direction {
            Direction::Up => close_price > self.entry_price,
            Direction::Down => close_price < self.entry_price,
        };

        if won {
            let profit = self.stake * self.payout_rate / Decimal::ONE_HUNDRED;
            Resolution {
                status: ContractStatus::Won,
                profit,
                credit: self.stake + profit,
            }
        } else {
            Resolution {
                status: ContractStatus::Lost,
                profit: -self.stake,
                credit: Decimal::ZERO,
            }
        }
    }

    /// Copy of this contract with the resolution applied
    pub fn settled(&self, close_price: f64, close_time_ms: i64, resolution: &Resolution) -> Self {
        Self {
            close_price: Some(close_price),
            close_time_ms: Some(close_time_ms),
            status: resolution.status,
            profit: resolution.profit,
            ..self.clone()
        }
    }
}

/// Random eight-digit contract id
pub fn new_contract_id() -> String {
    rand::rng().random_range(10_000_000u32..100_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contract(direction: Direction) -> Contract {
        Contract::open(
            "user-1",
            "EUR/USD",
            AccountKind::Practice,
            dec!(100),
            direction,
            dec!(85),
            1.1000,
            0,
            60_000,
        )
        .unwrap()
    }

    #[test]
    fn test_open_sets_expiry() {
        let c = contract(Direction::Up);
        assert_eq!(c.expiry_time_ms, 60_000);
        assert_eq!(c.status, ContractStatus::Active);
        assert_eq!(c.contract_id.len(), 8);
        assert!(!c.is_expired(59_999));
        assert!(c.is_expired(60_000));
    }

    #[test]
    fn test_open_rejects_bad_input() {
        let open = |stake, horizon_ms| {
            Contract::open(
                "u",
                "EUR/USD",
                AccountKind::Funded,
                stake,
                Direction::Up,
                dec!(85),
                1.1,
                0,
                horizon_ms,
            )
        };
        assert!(open(dec!(0), 60_000).is_err());
        assert!(open(dec!(10), 0).is_err());
    }

    #[test]
    fn test_up_contract_wins() {
        let r = contract(Direction::Up).resolve(1.1050);
        assert_eq!(r.status, ContractStatus::Won);
        assert_eq!(r.profit, dec!(85));
        assert_eq!(r.credit, dec!(185));
    }

    #[test]
    fn test_up_contract_loses() {
        let r = contract(Direction::Up).resolve(1.0950);
        assert_eq!(r.status, ContractStatus::Lost);
        assert_eq!(r.profit, dec!(-100));
        assert_eq!(r.credit, Decimal::ZERO);
    }

    #[test]
    fn test_within_epsilon_returns_stake() {
        let r = contract(Direction::Up).resolve(1.10000001);
        assert_eq!(r.status, ContractStatus::Returned);
        assert_eq!(r.profit, Decimal::ZERO);
        assert_eq!(r.credit, dec!(100));
    }

    #[test]
    fn test_down_contract() {
        let c = contract(Direction::Down);
        assert_eq!(c.resolve(1.0950).status, ContractStatus::Won);
        assert_eq!(c.resolve(1.1050).status, ContractStatus::Lost);
    }

    #[test]
    fn test_settled_copy() {
        let c = contract(Direction::Up);
        let r = c.resolve(1.1050);
        let s = c.settled(1.1050, 61_000, &r);
        assert_eq!(s.status, ContractStatus::Won);
        assert_eq!(s.close_price, Some(1.1050));
        assert_eq!(s.close_time_ms, Some(61_000));
        assert_eq!(s.contract_id, c.contract_id);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("demo".parse::<AccountKind>().unwrap(), AccountKind::Practice);
        assert_eq!("real".parse::<AccountKind>().unwrap(), AccountKind::Funded);
        assert_eq!("call".parse::<Direction>().unwrap(), Direction::Up);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!("won".parse::<ContractStatus>().unwrap(), ContractStatus::Won);
        assert!(ContractStatus::Lost.is_terminal());
        assert!(!ContractStatus::Active.is_terminal());
    }
}
