//! Per-user account balances

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contract::AccountKind;

/// The two independent balances owned by a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub practice: Decimal,
    pub funded: Decimal,
}

impl Balances {
    pub fn new(practice: Decimal, funded: Decimal) -> Self {
        Self { practice, funded }
    }

    pub fn get(&self, account: AccountKind) -> Decimal {
        match account {
            AccountKind::Practice => self.practice,
            AccountKind::Funded => self.funded,
        }
    }

    /// Add `amount` to one partition, leaving the other untouched
    pub fn credit(&mut self, account: AccountKind, amount: Decimal) {
        match account {
            AccountKind::Practice => self.practice += amount,
            AccountKind::Funded => self.funded += amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_credit_is_partitioned() {
        let mut b = Balances::new(dec!(10000), dec!(50));
        b.credit(AccountKind::Funded, dec!(25.5));
        assert_eq!(b.get(AccountKind::Funded), dec!(75.5));
        assert_eq!(b.get(AccountKind::Practice), dec!(10000));
    }
}
