//! User notifications
//!
//! Outbound events for a delivery layer that fans them out to connected
//! clients. Delivery is best-effort: callers log failures and move on.

use quotes_core::{AccountKind, Balances};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

/// Event name for a settled contract
pub const CONTRACT_UPDATED: &str = "contractUpdated";
/// Event name for a changed balance
pub const BALANCE_UPDATED: &str = "balanceUpdated";

/// Anything that can push an event to a single user
pub trait NotificationSink: Send + Sync {
    fn send_to_user(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError>;
}

/// An event addressed to one user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub user_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Payload of a `balanceUpdated` event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    pub practice_balance: Decimal,
    pub funded_balance: Decimal,
    pub account: AccountKind,
    pub change: Decimal,
}

impl BalanceUpdate {
    pub fn new(balances: &Balances, account: AccountKind, change: Decimal) -> Self {
        Self {
            practice_balance: balances.practice,
            funded_balance: balances.funded,
            account,
            change,
        }
    }
}

/// Broadcast hub; the delivery layer subscribes and routes by `user_id`
pub struct UserEventHub {
    tx: broadcast::Sender<UserEvent>,
}

impl UserEventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for UserEventHub {
    fn default() -> Self {
        Self::new(1_024)
    }
}

impl NotificationSink for UserEventHub {
    fn send_to_user(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError> {
        self.tx
            .send(UserEvent {
                user_id: user_id.to_string(),
                event: event.to_string(),
                payload,
            })
            .map(|_| ())
            .map_err(|_| NotificationError::NoSubscribers {
                event: event.to_string(),
            })
    }
}

/// Errors from notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("No subscribers for {event}")]
    NoSubscribers { event: String },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_hub_delivers_events() {
        let hub = UserEventHub::default();
        let mut rx = hub.subscribe();

        let balances = Balances::new(dec!(10), dec!(20));
        let update = BalanceUpdate::new(&balances, AccountKind::Funded, dec!(5));
        hub.send_to_user("u1", BALANCE_UPDATED, serde_json::to_value(&update).unwrap())
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.event, "balanceUpdated");
        assert_eq!(event.payload["account"], "funded");
        assert_eq!(event.payload["change"], "5");
    }

    #[test]
    fn test_no_subscribers_is_an_error() {
        let hub = UserEventHub::default();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(matches!(
            hub.send_to_user("u1", CONTRACT_UPDATED, serde_json::Value::Null),
            Err(NotificationError::NoSubscribers { .. })
        ));
    }
}
