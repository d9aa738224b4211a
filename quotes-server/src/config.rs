//! Server configuration from environment variables

use quotes_core::Feed;
use quotes_services::SettlementConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "data/quotes.db";

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    /// Enabled feeds and their relay URLs
    pub relays: Vec<(Feed, String)>,
    pub settlement: SettlementConfig,
}

impl ServerConfig {
    /// Load configuration from the process environment
    ///
    /// Reads:
    /// - QUOTES_DB_PATH: SQLite file (default `data/quotes.db`)
    /// - FOREX_RELAY_URL / CRYPTO_RELAY_URL / OTC_RELAY_URL: a feed runs only when set
    /// - SETTLEMENT_INTERVAL_MS, SETTLEMENT_BATCH_SIZE, PRICE_TOLERANCE_MS
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("QUOTES_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
            .into();

        let relays = Feed::ALL
            .iter()
            .filter_map(|feed| {
                lookup(relay_url_var(*feed))
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .map(|url| (*feed, url))
            })
            .collect();

        let mut settlement = SettlementConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "SETTLEMENT_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError::OutOfRange {
                    field: "SETTLEMENT_INTERVAL_MS".to_string(),
                });
            }
            settlement.check_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "SETTLEMENT_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::OutOfRange {
                    field: "SETTLEMENT_BATCH_SIZE".to_string(),
                });
            }
            settlement.batch_size = size;
        }
        if let Some(tolerance) = parse_var::<i64>(&lookup, "PRICE_TOLERANCE_MS")? {
            settlement.price_tolerance_ms = tolerance.max(0);
        }

        Ok(Self {
            db_path,
            relays,
            settlement,
        })
    }
}

fn relay_url_var(feed: Feed) -> &'static str {
    match feed {
        Feed::Forex => "FOREX_RELAY_URL",
        Feed::Crypto => "CRYPTO_RELAY_URL",
        Feed::Otc => "OTC_RELAY_URL",
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    field: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(field) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidNumber {
                field: field.to_string(),
                error: e.to_string(),
            }),
    }
}

/// Errors loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid number in {field}: {error}")]
    InvalidNumber { field: String, error: String },

    #[error("{field} must be greater than zero")]
    OutOfRange { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("data/quotes.db"));
        assert!(config.relays.is_empty());
        assert_eq!(config.settlement.batch_size, 100);
        assert_eq!(config.settlement.check_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_feeds_enabled_by_url() {
        let config = load(&[
            ("FOREX_RELAY_URL", "ws://localhost:8080"),
            ("OTC_RELAY_URL", "ws://localhost:8082"),
            ("CRYPTO_RELAY_URL", "  "),
        ])
        .unwrap();
        let feeds: Vec<Feed> = config.relays.iter().map(|(feed, _)| *feed).collect();
        assert_eq!(feeds, vec![Feed::Forex, Feed::Otc]);
    }

    #[test]
    fn test_settlement_overrides() {
        let config = load(&[
            ("SETTLEMENT_INTERVAL_MS", "250"),
            ("SETTLEMENT_BATCH_SIZE", "20"),
            ("QUOTES_DB_PATH", "/tmp/q.db"),
        ])
        .unwrap();
        assert_eq!(config.settlement.check_interval, Duration::from_millis(250));
        assert_eq!(config.settlement.batch_size, 20);
        assert_eq!(config.db_path, PathBuf::from("/tmp/q.db"));
    }

    #[test]
    fn test_malformed_numbers_rejected() {
        assert!(matches!(
            load(&[("SETTLEMENT_BATCH_SIZE", "lots")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            load(&[("SETTLEMENT_INTERVAL_MS", "0")]),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
