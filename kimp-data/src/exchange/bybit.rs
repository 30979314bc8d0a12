use crate::{
    error::DataError,
    exchange::{
        Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage, de_lenient_f64,
        positive,
    },
    model::{ExchangeId, MarketEvent, PricePoint, Quote, Symbol, normalise_symbol},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// [`Bybit`] spot server base url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
pub const BASE_URL_BYBIT_SPOT: &str = "wss://stream.bybit.com/v5/public/spot";

/// [`Bybit`] server [`PingInterval`] duration.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect#how-to-send-the-heartbeat-packet>
pub const PING_INTERVAL_BYBIT: Duration = Duration::from_secs(20);

/// Spot connections accept at most 10 `args` per subscription request.
pub const SUBSCRIBE_BATCH_BYBIT: usize = 10;

/// [`Bybit`] spot `tickers` topic.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/ticker>
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Bybit;

impl Bybit {
    fn requests(op: &str, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .chunks(SUBSCRIBE_BATCH_BYBIT)
            .map(|batch| {
                let args = batch
                    .iter()
                    .map(|symbol| format!("tickers.{symbol}USDT"))
                    .collect::<Vec<_>>();
                WsMessage::text(json!({ "op": op, "args": args }).to_string())
            })
            .collect()
    }
}

impl Connector for Bybit {
    fn feed(&self) -> FeedId {
        FeedId::Bybit
    }

    fn urls(&self) -> &'static [&'static str] {
        &[BASE_URL_BYBIT_SPOT]
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_BYBIT,
            ping: || WsMessage::text(json!({ "op": "ping" }).to_string()),
        })
    }

    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("subscribe", symbols)
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("unsubscribe", symbols)
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        let message = serde_json::from_str::<BybitMessage>(text)
            .map_err(|error| DataError::deserialise(ExchangeId::Bybit, error))?;

        match message {
            BybitMessage::Ticker { data, .. } => Ok(data
                .into_price(ctx.received)
                .map(|price| ConnectorEvent::Market(MarketEvent::Price(price)))
                .into_iter()
                .collect()),
            BybitMessage::Response {
                success: false,
                ret_msg,
                ..
            } => {
                let rejected = rejected_topics(&ret_msg);
                if rejected.is_empty() {
                    Err(DataError::Rejected {
                        exchange: ExchangeId::Bybit,
                        message: ret_msg,
                    })
                } else {
                    Ok(rejected
                        .into_iter()
                        .map(|symbol| ConnectorEvent::Rejected {
                            symbol,
                            reason: ret_msg.clone(),
                        })
                        .collect())
                }
            }
            // pong & successful subscription acks
            BybitMessage::Response { .. } => Ok(vec![]),
        }
    }
}

/// Extract rejected base assets from a Bybit subscribe failure (eg/ "Invalid symbol
/// :[tickers.FOOUSDT]").
fn rejected_topics(ret_msg: &str) -> Vec<Symbol> {
    if !ret_msg.to_lowercase().contains("invalid symbol") {
        return vec![];
    }

    ret_msg
        .split(|c: char| c == '[' || c == ']' || c == ',' || c.is_whitespace())
        .filter_map(|topic| topic.strip_prefix("tickers."))
        .filter_map(|market| market.strip_suffix("USDT"))
        .filter(|base| !base.is_empty())
        .map(normalise_symbol)
        .collect()
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum BybitMessage {
    Ticker {
        topic: String,
        data: BybitTicker,
    },
    Response {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        ret_msg: String,
        #[serde(default)]
        op: String,
    },
}

/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/ticker>
///```json
/// {
///     "symbol": "BTCUSDT",
///     "lastPrice": "21109.77",
///     "highPrice24h": "21426.99",
///     "lowPrice24h": "20575",
///     "prevPrice24h": "20704.93",
///     "volume24h": "6780.866843",
///     "turnover24h": "141946527.22907118",
///     "price24hPcnt": "0.0196",
///     "usdIndexPrice": "21120.2400136"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitTicker {
    pub symbol: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high_price_24h: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low_price_24h: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub turnover_24h: f64,

    /// Fractional change (eg/ 0.0196 == 1.96%).
    #[serde(rename = "price24hPcnt", default, deserialize_with = "de_lenient_f64")]
    pub price_24h_pcnt: f64,
}

impl BybitTicker {
    /// Convert into a USDT-quoted [`PricePoint`] received at `received`.
    pub fn into_price(self, received: DateTime<Utc>) -> Option<PricePoint> {
        let base = self.symbol.strip_suffix("USDT").filter(|base| !base.is_empty())?;

        Some(
            PricePoint::new(ExchangeId::Bybit, base, Quote::Usdt, self.last_price, received)
                .with_change_24h_rate(Some(self.price_24h_pcnt * 100.0))
                .with_volume_24h_quote(Some(self.turnover_24h))
                .with_high_low(positive(self.high_price_24h), positive(self.low_price_24h)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{symbols, time_plus_secs};

    #[test]
    fn test_bybit_subscribe_batches_of_10() {
        let tracked = (0..25)
            .map(|index| Symbol::from(format!("S{index}")))
            .collect::<Vec<_>>();

        let requests = Bybit.subscribe(&tracked);
        assert_eq!(requests.len(), 3);

        let last: serde_json::Value =
            serde_json::from_str(requests[2].to_text().unwrap()).unwrap();
        assert_eq!(last["args"].as_array().unwrap().len(), 5);
        assert_eq!(last["args"][0], "tickers.S20USDT");
    }

    #[test]
    fn test_bybit_parse() {
        let tracked = symbols(&["BTC"]);
        let ctx = ParseContext {
            symbols: &tracked,
            received: time_plus_secs(0),
        };

        struct TestCase {
            input: &'static str,
            expected: Result<Vec<ConnectorEvent>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: pong
                input: r#"{"success":true,"ret_msg":"pong","conn_id":"0970e817","op":"ping"}"#,
                expected: Ok(vec![]),
            },
            TestCase {
                // TC1: subscribe ack
                input: r#"{"success":true,"ret_msg":"","conn_id":"0970e817","req_id":"","op":"subscribe"}"#,
                expected: Ok(vec![]),
            },
            TestCase {
                // TC2: invalid symbol is rejected
                input: r#"{"success":false,"ret_msg":"Invalid symbol :[tickers.FOOUSDT]","conn_id":"0970e817","op":"subscribe"}"#,
                expected: Ok(vec![ConnectorEvent::Rejected {
                    symbol: Symbol::new("FOO"),
                    reason: "Invalid symbol :[tickers.FOOUSDT]".to_string(),
                }]),
            },
            TestCase {
                // TC3: other failure
                input: r#"{"success":false,"ret_msg":"args size >10","conn_id":"0970e817","op":"subscribe"}"#,
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Bybit.parse(&ctx, test.input).map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_bybit_parse_ticker_scales_change_rate() {
        let tracked = symbols(&["BTC"]);
        let ctx = ParseContext {
            symbols: &tracked,
            received: time_plus_secs(0),
        };

        let input = r#"{"topic":"tickers.BTCUSDT","ts":1673853746003,"type":"snapshot","cs":2588407389,"data":{"symbol":"BTCUSDT","lastPrice":"21109.77","highPrice24h":"21426.99","lowPrice24h":"20575","prevPrice24h":"20704.93","volume24h":"6780.866843","turnover24h":"141946527.22907118","price24hPcnt":"0.0196","usdIndexPrice":"21120.2400136"}}"#;
        let actual = Bybit.parse(&ctx, input).unwrap();

        let ConnectorEvent::Market(MarketEvent::Price(price)) = &actual[0] else {
            panic!("unexpected event: {actual:?}");
        };
        assert_eq!(price.price, 21109.77);
        assert!((price.change_24h_rate.unwrap() - 1.96).abs() < 1e-9);
        assert_eq!(price.low_24h, Some(20575.0));
    }
}
