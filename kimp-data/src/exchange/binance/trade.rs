use super::{binance_ping, strip_usdt};
use crate::{
    error::DataError,
    exchange::{Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage, de_lenient_f64},
    model::{
        Candle, CandleEvent, ExchangeId, Interval, MarketEvent, PublicTrade, Side, Symbol,
        normalise_symbol,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// [`BinanceTrades`] combined stream server urls in fallback order.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#general-wss-information>
pub const URLS_BINANCE_COMBINED: &[&str] = &[
    "wss://stream.binance.com:9443/stream",
    "wss://data-stream.binance.vision/stream",
];

/// Maximum number of symbols per `SUBSCRIBE` request (three streams each).
pub const SUBSCRIBE_BATCH_SYMBOLS: usize = 30;

/// Binance limits inbound control messages to 5 per second.
pub const SUBSCRIBE_BATCH_DELAY: Duration = Duration::from_millis(250);

/// Binance spot combined `aggTrade`, `kline_1m` & `kline_1h` streams. Feeds the trade
/// aggregator and candle store of the signal engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BinanceTrades;

impl BinanceTrades {
    fn streams(symbol: &Symbol) -> [String; 3] {
        let market = format!("{}usdt", symbol.to_lowercase());
        [
            format!("{market}@aggTrade"),
            format!("{market}@kline_1m"),
            format!("{market}@kline_1h"),
        ]
    }

    fn requests(method: &str, id_offset: usize, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .chunks(SUBSCRIBE_BATCH_SYMBOLS)
            .enumerate()
            .map(|(index, batch)| {
                let params = batch.iter().flat_map(Self::streams).collect::<Vec<_>>();
                WsMessage::text(
                    json!({
                        "method": method,
                        "params": params,
                        "id": id_offset + index,
                    })
                    .to_string(),
                )
            })
            .collect()
    }
}

impl Connector for BinanceTrades {
    fn feed(&self) -> FeedId {
        FeedId::BinanceTrades
    }

    fn urls(&self) -> &'static [&'static str] {
        URLS_BINANCE_COMBINED
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(binance_ping())
    }

    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("SUBSCRIBE", 1, symbols)
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("UNSUBSCRIBE", 10_000, symbols)
    }

    fn batch_delay(&self) -> Duration {
        SUBSCRIBE_BATCH_DELAY
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        let message = serde_json::from_str::<BinanceCombinedMessage>(text)
            .map_err(|error| DataError::deserialise(ExchangeId::BinanceSpot, error))?;

        let event = match message {
            BinanceCombinedMessage::Stream { data, .. } => match data {
                BinanceStreamData::AggTrade(trade) => trade.into_trade(ctx),
                BinanceStreamData::Kline(kline) => kline.into_candle(ctx),
            },
            BinanceCombinedMessage::Ack { .. } => None,
        };

        Ok(event.map(ConnectorEvent::Market).into_iter().collect())
    }
}

/// Envelope of every message received on the combined stream endpoint.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum BinanceCombinedMessage {
    Stream {
        stream: String,
        data: BinanceStreamData,
    },
    Ack {
        result: Option<serde_json::Value>,
        id: u64,
    },
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(tag = "e")]
pub enum BinanceStreamData {
    #[serde(rename = "aggTrade")]
    AggTrade(BinanceAggTrade),
    #[serde(rename = "kline")]
    Kline(BinanceKlineEvent),
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#aggregate-trade-streams>
///```json
/// {
///     "e": "aggTrade",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "a": 12345,
///     "p": "0.001",
///     "q": "100",
///     "f": 100,
///     "l": 105,
///     "T": 1672515782136,
///     "m": true,
///     "M": true
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "p", deserialize_with = "de_lenient_f64")]
    pub price: f64,

    #[serde(rename = "q", deserialize_with = "de_lenient_f64")]
    pub quantity: f64,

    #[serde(rename = "T")]
    pub trade_time_ms: i64,

    /// Buyer is the maker, therefore the aggressor sold.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl BinanceAggTrade {
    fn into_trade(self, ctx: &ParseContext<'_>) -> Option<MarketEvent> {
        let symbol = tracked_base(&self.market, ctx)?;
        if self.price <= 0.0 || self.quantity <= 0.0 {
            return None;
        }

        Some(MarketEvent::Trade(PublicTrade {
            exchange: ExchangeId::BinanceSpot,
            symbol,
            price: self.price,
            quantity: self.quantity,
            side: if self.buyer_is_maker {
                Side::Sell
            } else {
                Side::Buy
            },
            time_exchange: DateTime::<Utc>::from_timestamp_millis(self.trade_time_ms)
                .unwrap_or(ctx.received),
            time_received: ctx.received,
        }))
    }
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#klinecandlestick-streams-for-utc>
///```json
/// {
///     "e": "kline",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "k": {
///         "t": 1672515780000,
///         "T": 1672515839999,
///         "s": "BTCUSDT",
///         "i": "1m",
///         "o": "0.0010",
///         "c": "0.0020",
///         "h": "0.0025",
///         "l": "0.0015",
///         "v": "1000",
///         "x": false
///     }
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "k")]
    pub kline: BinanceKline,
}

#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceKline {
    #[serde(rename = "t")]
    pub open_time_ms: i64,

    #[serde(rename = "i")]
    pub interval: String,

    #[serde(rename = "o", deserialize_with = "de_lenient_f64")]
    pub open: f64,

    #[serde(rename = "h", deserialize_with = "de_lenient_f64")]
    pub high: f64,

    #[serde(rename = "l", deserialize_with = "de_lenient_f64")]
    pub low: f64,

    #[serde(rename = "c", deserialize_with = "de_lenient_f64")]
    pub close: f64,

    #[serde(rename = "v", deserialize_with = "de_lenient_f64")]
    pub volume: f64,

    #[serde(rename = "x")]
    pub closed: bool,
}

impl BinanceKlineEvent {
    fn into_candle(self, ctx: &ParseContext<'_>) -> Option<MarketEvent> {
        let symbol = tracked_base(&self.market, ctx)?;
        let interval = match self.kline.interval.as_str() {
            "1m" => Interval::OneMinute,
            "1h" => Interval::OneHour,
            _ => return None,
        };

        Some(MarketEvent::Candle(CandleEvent {
            exchange: ExchangeId::BinanceSpot,
            symbol,
            interval,
            candle: Candle {
                open_time: DateTime::<Utc>::from_timestamp_millis(self.kline.open_time_ms)?,
                open: self.kline.open,
                high: self.kline.high,
                low: self.kline.low,
                close: self.kline.close,
                volume: self.kline.volume,
                closed: self.kline.closed,
            },
        }))
    }
}

fn tracked_base(market: &str, ctx: &ParseContext<'_>) -> Option<Symbol> {
    let base = normalise_symbol(strip_usdt(&market.to_uppercase())?);
    ctx.symbols.contains(&base).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{symbols, time_plus_secs};

    #[test]
    fn test_binance_trades_subscribe_batches() {
        let tracked = (0..31)
            .map(|index| Symbol::from(format!("S{index}")))
            .collect::<Vec<_>>();

        let requests = BinanceTrades.subscribe(&tracked);
        assert_eq!(requests.len(), 2);

        let first: serde_json::Value =
            serde_json::from_str(requests[0].to_text().unwrap()).unwrap();
        assert_eq!(first["method"], "SUBSCRIBE");
        assert_eq!(first["params"].as_array().unwrap().len(), 90);
        assert_eq!(first["params"][0], "s0usdt@aggTrade");
        assert_eq!(first["params"][1], "s0usdt@kline_1m");
        assert_eq!(first["params"][2], "s0usdt@kline_1h");
    }

    #[test]
    fn test_binance_trades_parse() {
        let tracked = symbols(&["BTC"]);
        let received = time_plus_secs(0);
        let ctx = ParseContext {
            symbols: &tracked,
            received,
        };

        struct TestCase {
            input: &'static str,
            expected: Vec<ConnectorEvent>,
        }

        let tests = vec![
            TestCase {
                // TC0: aggTrade with buyer as maker is a sell
                input: r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1,"s":"BTCUSDT","a":1,"p":"100.0","q":"2.5","f":1,"l":1,"T":1700000000000,"m":true,"M":true}}"#,
                expected: vec![ConnectorEvent::Market(MarketEvent::Trade(PublicTrade {
                    exchange: ExchangeId::BinanceSpot,
                    symbol: Symbol::new("BTC"),
                    price: 100.0,
                    quantity: 2.5,
                    side: Side::Sell,
                    time_exchange: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
                        .unwrap(),
                    time_received: received,
                }))],
            },
            TestCase {
                // TC1: closed 1m kline
                input: r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"1","c":"2","h":"3","l":"0.5","v":"10","x":true}}}"#,
                expected: vec![ConnectorEvent::Market(MarketEvent::Candle(CandleEvent {
                    exchange: ExchangeId::BinanceSpot,
                    symbol: Symbol::new("BTC"),
                    interval: Interval::OneMinute,
                    candle: Candle {
                        open_time: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
                            .unwrap(),
                        open: 1.0,
                        high: 3.0,
                        low: 0.5,
                        close: 2.0,
                        volume: 10.0,
                        closed: true,
                    },
                }))],
            },
            TestCase {
                // TC2: subscription ack is ignored
                input: r#"{"result":null,"id":1}"#,
                expected: vec![],
            },
            TestCase {
                // TC3: untracked symbol is ignored
                input: r#"{"stream":"ethusdt@aggTrade","data":{"e":"aggTrade","E":1,"s":"ETHUSDT","a":1,"p":"1","q":"1","f":1,"l":1,"T":1,"m":false,"M":true}}"#,
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = BinanceTrades.parse(&ctx, test.input).unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
