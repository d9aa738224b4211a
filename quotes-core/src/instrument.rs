//! Upstream feeds and the static instrument catalog

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Upstream price feeds. Each one gets its own tick windower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    /// Spot forex pairs, relayed as `CAS` aggregates
    Forex,
    /// Crypto pairs, relayed as `XAS` aggregates
    Crypto,
    /// Synthetic over-the-counter pairs, relayed as `OTC` ticks
    Otc,
}

impl Feed {
    pub const ALL: [Feed; 3] = [Feed::Forex, Feed::Crypto, Feed::Otc];

    /// Event tag the relay stamps on this feed's messages
    pub fn event_tag(&self) -> &'static str {
        match self {
            Feed::Forex => "CAS",
            Feed::Crypto => "XAS",
            Feed::Otc => "OTC",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Feed::Forex => "Forex",
            Feed::Crypto => "Crypto",
            Feed::Otc => "OTC",
        }
    }

    /// Map a raw relay pair name onto the catalog's instrument id.
    ///
    /// `EURUSD` (forex) becomes `EUR/USD`, `BTC-USD` (crypto) becomes
    /// `BTC/USD`, and `EUR/USD` on the OTC feed becomes `EUR/USD OTC`.
    pub fn canonical_instrument(&self, raw_pair: &str) -> String {
        let raw = raw_pair.trim();
        match self {
            Feed::Forex => match (raw.len(), raw.get(..3), raw.get(3..)) {
                (6, Some(base), Some(quote)) if raw.is_ascii() && !raw.contains('/') => {
                    format!("{}/{}", base, quote)
                }
                _ => raw.to_string(),
            },
            Feed::Crypto => raw.replacen('-', "/", 1),
            Feed::Otc => {
                if raw.ends_with(" OTC") {
                    raw.to_string()
                } else {
                    format!("{} OTC", raw)
                }
            }
        }
    }

    /// Pair name as the relay expects it in a subscribe message
    pub fn relay_pair(&self, instrument: &str) -> String {
        match self {
            Feed::Forex => instrument.to_string(),
            Feed::Crypto => instrument.replacen('/', "-", 1),
            Feed::Otc => instrument.trim_end_matches(" OTC").to_string(),
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Feed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forex" | "fx" | "cas" => Ok(Feed::Forex),
            "crypto" | "xas" => Ok(Feed::Crypto),
            "otc" | "synthetic" => Ok(Feed::Otc),
            _ => Err(format!("Unknown feed: {}", s)),
        }
    }
}

const FOREX_INSTRUMENTS: &[&str] = &[
    "EUR/USD", "AUD/CAD", "USD/JPY", "AUD/JPY", "GBP/USD", "GBP/CAD", "EUR/CAD", "CHF/JPY",
    "CAD/CHF", "USD/CHF", "USD/CAD", "GBP/AUD", "AUD/CHF", "EUR/CHF", "GBP/CHF", "CAD/JPY",
    "EUR/JPY", "GBP/JPY", "EUR/GBP", "AUD/USD",
];

const CRYPTO_INSTRUMENTS: &[&str] = &[
    "BTC/USD", "ETH/USD", "LTC/USD", "XRP/USD", "SOL/USD", "ADA/USD", "DOT/USD", "MATIC/USD",
    "AVAX/USD", "LINK/USD",
];

/// OTC-only pairs on top of the forex and crypto majors
const OTC_EXTRA_INSTRUMENTS: &[&str] = &[
    "USD/UAH", "USD/RUB", "NZD/USD", "EUR/AUD", "NZD/JPY", "AUD/NZD", "EUR/NZD", "GBP/NZD",
    "NZD/CHF", "NZD/CAD", "USD/CNY", "EUR/CNY", "GBP/CNY", "USD/INR", "EUR/INR", "GBP/INR",
    "EUR/RUB", "GBP/RUB", "EUR/UAH", "GBP/UAH", "USD/MXN",
];

/// Static set of tradeable instruments
#[derive(Debug, Clone)]
pub struct InstrumentCatalog {
    instruments: HashSet<String>,
}

impl InstrumentCatalog {
    /// Build a catalog from an explicit list of instrument ids
    pub fn new<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
        }
    }

    /// Instruments served by a single feed
    pub fn for_feed(feed: Feed) -> Vec<String> {
        match feed {
            Feed::Forex => FOREX_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            Feed::Crypto => CRYPTO_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            Feed::Otc => FOREX_INSTRUMENTS
                .iter()
                .chain(OTC_EXTRA_INSTRUMENTS)
                .chain(CRYPTO_INSTRUMENTS)
                .map(|s| format!("{} OTC", s))
                .collect(),
        }
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.instruments.contains(instrument)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Which feed prices an instrument, judging by its id
    pub fn feed_of(&self, instrument: &str) -> Option<Feed> {
        if !self.contains(instrument) {
            return None;
        }
        if instrument.ends_with(" OTC") {
            Some(Feed::Otc)
        } else if CRYPTO_INSTRUMENTS.contains(&instrument) {
            Some(Feed::Crypto)
        } else {
            Some(Feed::Forex)
        }
    }
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::new(Feed::ALL.iter().flat_map(|feed| Self::for_feed(*feed)))
    }
}
