use crate::{
    error::DataError,
    model::{ExchangeId, MarketEvent, Symbol},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fmt::{Debug, Display, Formatter},
    sync::Arc,
    time::Duration,
};
use tokio_tungstenite::tungstenite::Message;

/// Binance spot & futures `!miniTicker@arr` firehose [`Connector`]s, plus the combined
/// aggTrade / kline stream used by the signal engine.
pub mod binance;

/// Bybit spot `tickers` [`Connector`].
pub mod bybit;

/// Gate spot `spot.tickers` [`Connector`].
pub mod gate;

/// MEXC spot `miniTicker` [`Connector`].
pub mod mexc;

/// OKX `tickers` channel [`Connector`].
pub mod okx;

/// Convenient type alias for a tungstenite WebSocket [`Message`].
pub type WsMessage = Message;

/// Identifies one streaming feed. Binance runs several feeds for the same [`ExchangeId`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedId {
    BinanceSpot,
    BinanceFutures,
    BinanceTrades,
    Okx,
    Bybit,
    Gate,
    Mexc,
}

impl FeedId {
    pub fn exchange(&self) -> ExchangeId {
        match self {
            FeedId::BinanceSpot | FeedId::BinanceTrades => ExchangeId::BinanceSpot,
            FeedId::BinanceFutures => ExchangeId::BinanceFutures,
            FeedId::Okx => ExchangeId::Okx,
            FeedId::Bybit => ExchangeId::Bybit,
            FeedId::Gate => ExchangeId::Gate,
            FeedId::Mexc => ExchangeId::Mexc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedId::BinanceSpot => "binance_spot",
            FeedId::BinanceFutures => "binance_futures",
            FeedId::BinanceTrades => "binance_trades",
            FeedId::Okx => "okx",
            FeedId::Bybit => "bybit",
            FeedId::Gate => "gate",
            FeedId::Mexc => "mexc",
        }
    }
}

impl Display for FeedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defines the frequency and construction function for custom application-level pings.
#[derive(Debug, Copy, Clone)]
pub struct PingInterval {
    pub interval: Duration,
    pub ping: fn() -> WsMessage,
}

/// Context available to a [`Connector`] when parsing an inbound message.
#[derive(Debug, Copy, Clone)]
pub struct ParseContext<'a> {
    /// Symbols currently tracked by the connection, used to filter firehose streams.
    pub symbols: &'a FnvHashSet<Symbol>,
    /// Local receive time stamped onto every event.
    pub received: DateTime<Utc>,
}

/// Output of parsing one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    Market(MarketEvent),
    /// Exchange does not list the symbol. It is excluded from future subscriptions.
    Rejected { symbol: Symbol, reason: String },
}

/// Defines the protocol of one exchange streaming feed: where to connect, how to
/// subscribe, how to keep the connection alive, and how to parse what comes back.
///
/// A single generic [`ExchangeConnector`](crate::connector::ExchangeConnector) drives every
/// implementation, so adapters contain no connection management.
pub trait Connector: Debug + Send + Sync + 'static {
    fn feed(&self) -> FeedId;

    /// Server urls in priority order. The connection rotates to the next url after
    /// every failure.
    fn urls(&self) -> &'static [&'static str];

    /// Application-level heartbeat, if the exchange requires one.
    fn ping(&self) -> Option<PingInterval>;

    /// Batched subscription messages for the provided symbols.
    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage>;

    /// Batched unsubscription messages for the provided symbols.
    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage>;

    /// Delay between consecutive subscription batches.
    fn batch_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Parse one inbound text message. Heartbeat replies & acknowledgements yield an
    /// empty `Vec`. Errors drop the message but keep the connection alive.
    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError>;
}

/// Every streaming [`Connector`] the engine runs by default.
pub fn default_connectors() -> Vec<Arc<dyn Connector>> {
    vec![
        Arc::new(binance::BinanceSpot),
        Arc::new(binance::BinanceFutures),
        Arc::new(binance::BinanceTrades),
        Arc::new(okx::Okx),
        Arc::new(bybit::Bybit),
        Arc::new(gate::Gate),
        Arc::new(mexc::Mexc),
    ]
}

/// Parse a numeric field leniently: malformed, missing or non-finite values become zero
/// rather than failing the whole message.
pub fn lenient_f64(value: &serde_json::Value) -> f64 {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(string) => string.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|value| value.is_finite()).unwrap_or(0.0)
}

/// Deserialize a numeric field (string or number) using [`lenient_f64`].
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(|value| lenient_f64(&value))
}

/// 24h change rate (%) derived from the last & opening prices, when the open is positive.
pub fn change_rate_from_open(last: f64, open: f64) -> Option<f64> {
    (open > 0.0).then(|| (last - open) / open * 100.0)
}

/// Positive value, else `None`.
pub(crate) fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_f64() {
        struct TestCase {
            input: serde_json::Value,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: numeric string
                input: json!("42.5"),
                expected: 42.5,
            },
            TestCase {
                // TC1: json number
                input: json!(7),
                expected: 7.0,
            },
            TestCase {
                // TC2: malformed string
                input: json!("abc"),
                expected: 0.0,
            },
            TestCase {
                // TC3: empty string
                input: json!(""),
                expected: 0.0,
            },
            TestCase {
                // TC4: null
                input: json!(null),
                expected: 0.0,
            },
            TestCase {
                // TC5: non-finite string
                input: json!("NaN"),
                expected: 0.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = lenient_f64(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_change_rate_from_open() {
        assert_eq!(change_rate_from_open(110.0, 100.0), Some(10.0));
        assert_eq!(change_rate_from_open(110.0, 0.0), None);
    }

    #[test]
    fn test_default_connectors_cover_every_feed() {
        let feeds = default_connectors()
            .iter()
            .map(|connector| connector.feed())
            .collect::<FnvHashSet<_>>();
        assert_eq!(feeds.len(), 7);
    }
}
