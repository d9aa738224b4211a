//! Relay Feed Client
//!
//! WebSocket consumer for one upstream relay. Parses relay aggregates into
//! ticks and forwards them to the feed's windower, reconnecting after a fixed
//! delay whenever the connection drops.

use futures_util::{SinkExt, StreamExt};
use quotes_core::{Feed, InstrumentCatalog, Tick};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Default delay before reconnecting to a relay
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One aggregate as published by a relay
#[derive(Debug, Clone, Deserialize)]
pub struct RelayMessage {
    pub ev: String,
    pub pair: String,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    /// Tick time, epoch millis
    pub s: i64,
}

impl RelayMessage {
    /// Convert into a tick for `feed`, or `None` if the event belongs to
    /// another feed
    pub fn into_tick(self, feed: Feed) -> Option<Tick> {
        if self.ev != feed.event_tag() {
            return None;
        }
        Some(Tick::new(
            feed.canonical_instrument(&self.pair),
            self.o,
            self.h,
            self.l,
            self.c,
            self.v,
            self.s,
        ))
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    action: &'static str,
    pair: &'a str,
}

/// Configuration for a relay client
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    /// Relay pair names to subscribe to after each connect
    pub pairs: Vec<String>,
    pub reconnect_delay: Duration,
}

impl RelayConfig {
    /// Relay config with the default subscriptions for `feed`.
    ///
    /// The OTC relay pushes every pair unprompted, so it gets no subscriptions.
    pub fn for_feed(feed: Feed, url: impl Into<String>) -> Self {
        let pairs = match feed {
            Feed::Otc => Vec::new(),
            Feed::Forex | Feed::Crypto => InstrumentCatalog::for_feed(feed)
                .iter()
                .map(|instrument| feed.relay_pair(instrument))
                .collect(),
        };
        Self {
            url: url.into(),
            pairs,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Parse one relay text frame into a tick for `feed`
pub fn parse_relay_frame(text: &str, feed: Feed) -> Result<Option<Tick>, serde_json::Error> {
    let message: RelayMessage = serde_json::from_str(text)?;
    Ok(message.into_tick(feed))
}

pub struct RelayFeedClient {
    feed: Feed,
    config: RelayConfig,
}

impl RelayFeedClient {
    pub fn new(feed: Feed, config: RelayConfig) -> Self {
        Self { feed, config }
    }

    /// Connection loop. Runs until `shutdown` flips to true or the tick
    /// receiver is dropped.
    pub async fn run(self, ticks: mpsc::Sender<Tick>, mut shutdown: watch::Receiver<bool>) {
        let feed = self.feed;

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("[{} Relay] Connecting to {}", feed, self.config.url);

            match connect_async(self.config.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("[{} Relay] Connected", feed);
                    let (mut write, mut read) = ws_stream.split();

                    for pair in &self.config.pairs {
                        let msg = SubscribeMessage {
                            action: "subscribe",
                            pair,
                        };
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                warn!("[{} Relay] Failed to subscribe to {}: {}", feed, pair, e);
                            }
                        }
                    }
                    if !self.config.pairs.is_empty() {
                        info!("[{} Relay] Subscribed to {} pairs", feed, self.config.pairs.len());
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match parse_relay_frame(&text, feed) {
                                            Ok(Some(tick)) => {
                                                if ticks.send(tick).await.is_err() {
                                                    info!(
                                                        "[{} Relay] Windower gone, exiting",
                                                        feed
                                                    );
                                                    return;
                                                }
                                            }
                                            Ok(None) => {}
                                            Err(e) => {
                                                debug!("[{} Relay] Ignoring frame: {}", feed, e)
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Ping(data))) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            warn!("[{} Relay] Failed to send pong: {}", feed, e);
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        info!("[{} Relay] Connection closed by server", feed);
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("[{} Relay] Error: {}", feed, e);
                                        break;
                                    }
                                    None => {
                                        info!("[{} Relay] Stream ended", feed);
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            _ = shutdown.changed() => {
                                info!("[{} Relay] Shutting down", feed);
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("[{} Relay] Connection failed: {}", feed, e);
                }
            }

            warn!(
                "[{} Relay] Disconnected, reconnecting in {:?}",
                feed, self.config.reconnect_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("[{} Relay] Stopped", feed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forex_frame() {
        let text = concat!(
            r#"{"ev":"CAS","pair":"EURUSD","o":1.1,"h":1.2,"l":1.0,"#,
            r#""c":1.15,"v":3,"s":1700000000000}"#
        );
        let tick = parse_relay_frame(text, Feed::Forex).unwrap().unwrap();
        assert_eq!(tick.instrument, "EUR/USD");
        assert_eq!(tick.close, 1.15);
        assert_eq!(tick.volume_delta, 3.0);
        assert_eq!(tick.tick_time_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_crypto_and_otc_frames() {
        let text = r#"{"ev":"XAS","pair":"BTC-USD","o":1,"h":1,"l":1,"c":1,"v":0,"s":0}"#;
        let tick = parse_relay_frame(text, Feed::Crypto).unwrap().unwrap();
        assert_eq!(tick.instrument, "BTC/USD");

        let text = r#"{"ev":"OTC","pair":"EUR/USD","o":1,"h":1,"l":1,"c":1,"v":0,"s":0}"#;
        let tick = parse_relay_frame(text, Feed::Otc).unwrap().unwrap();
        assert_eq!(tick.instrument, "EUR/USD OTC");
    }

    #[test]
    fn test_other_feed_events_ignored() {
        let text = r#"{"ev":"XAS","pair":"BTC-USD","o":1,"h":1,"l":1,"c":1,"v":0,"s":0}"#;
        assert!(parse_relay_frame(text, Feed::Forex).unwrap().is_none());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(parse_relay_frame("not json", Feed::Forex).is_err());
        let missing_close = r#"{"ev":"CAS","pair":"EURUSD","o":1,"h":1,"l":1,"v":0,"s":0}"#;
        assert!(parse_relay_frame(missing_close, Feed::Forex).is_err());
    }

    #[test]
    fn test_non_ascii_pair_does_not_panic() {
        let text = r#"{"ev":"CAS","pair":"a€bc","o":1,"h":1,"l":1,"c":1,"v":0,"s":0}"#;
        let tick = parse_relay_frame(text, Feed::Forex).unwrap().unwrap();
        assert_eq!(tick.instrument, "a€bc");
    }

    #[test]
    fn test_default_subscriptions() {
        let forex = RelayConfig::for_feed(Feed::Forex, "ws://localhost:8080");
        assert_eq!(forex.pairs.len(), 20);
        assert!(forex.pairs.contains(&"EUR/USD".to_string()));

        let crypto = RelayConfig::for_feed(Feed::Crypto, "ws://localhost:8081");
        assert!(crypto.pairs.contains(&"BTC-USD".to_string()));

        assert!(RelayConfig::for_feed(Feed::Otc, "ws://localhost:8082").pairs.is_empty());
    }
}
