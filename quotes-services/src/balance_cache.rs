//! Balance Cache
//!
//! Short-TTL, write-through copy of per-user balances. Purely an optimization:
//! a miss means "go to the store", never "the balance is zero".

use parking_lot::RwLock;
use quotes_core::Balances;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::storage::{QuoteStorage, StorageError};

/// Default time a cached balance stays valid
pub const BALANCE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct CachedBalances {
    balances: Balances,
    updated_at: Instant,
}

/// Balance cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCacheStats {
    pub size: usize,
    pub users: Vec<String>,
}

pub struct BalanceCache {
    entries: RwLock<HashMap<String, CachedBalances>>,
    ttl: Duration,
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::with_ttl(BALANCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached balances, if younger than the TTL. Expired entries are evicted.
    pub fn get(&self, user_id: &str) -> Option<Balances> {
        {
            let entries = self.entries.read();
            match entries.get(user_id) {
                None => return None,
                Some(cached) if cached.updated_at.elapsed() < self.ttl => {
                    return Some(cached.balances);
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        if let Some(cached) = entries.get(user_id) {
            if cached.updated_at.elapsed() >= self.ttl {
                entries.remove(user_id);
                debug!("[BalanceCache] Evicted expired balances for {}", user_id);
                return None;
            }
            return Some(cached.balances);
        }
        None
    }

    pub fn set(&self, user_id: &str, balances: Balances) {
        self.entries.write().insert(
            user_id.to_string(),
            CachedBalances {
                balances,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, user_id: &str) {
        self.entries.write().remove(user_id);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> BalanceCacheStats {
        let entries = self.entries.read();
        let mut users: Vec<String> = entries.keys().cloned().collect();
        users.sort();
        BalanceCacheStats {
            size: users.len(),
            users,
        }
    }

    /// Read through the cache, filling it from the store on a miss
    pub fn load_balances(
        &self,
        user_id: &str,
        storage: &QuoteStorage,
    ) -> Result<Option<Balances>, StorageError> {
        if let Some(balances) = self.get(user_id) {
            return Ok(Some(balances));
        }

        let balances = storage.user_balances(user_id)?;
        if let Some(balances) = balances {
            self.set(user_id, balances);
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_set_get_invalidate() {
        let cache = BalanceCache::new();
        assert!(cache.get("u1").is_none());

        cache.set("u1", Balances::new(dec!(10000), dec!(5)));
        assert_eq!(cache.get("u1").unwrap().funded, dec!(5));

        cache.invalidate("u1");
        assert!(cache.get("u1").is_none());
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = BalanceCache::with_ttl(Duration::from_millis(20));
        cache.set("u1", Balances::new(dec!(1), dec!(2)));
        assert!(cache.get("u1").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("u1").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = BalanceCache::new();
        cache.set("b", Balances::default());
        cache.set("a", Balances::default());

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.users, vec!["a".to_string(), "b".to_string()]);

        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_load_balances_reads_through() {
        let storage = QuoteStorage::new_in_memory().unwrap();
        storage
            .insert_user("u1", &Balances::new(dec!(100), dec!(0)))
            .unwrap();
        let cache = BalanceCache::new();

        let loaded = cache.load_balances("u1", &storage).unwrap().unwrap();
        assert_eq!(loaded.practice, dec!(100));
        assert_eq!(cache.get("u1"), Some(loaded));

        assert!(cache.load_balances("missing", &storage).unwrap().is_none());
    }
}
