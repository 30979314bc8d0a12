use crate::{
    error::DataError,
    exchange::{
        Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage,
        change_rate_from_open, lenient_f64, positive,
    },
    model::{ExchangeId, MarketEvent, PricePoint, Quote, Symbol, normalise_symbol},
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// [`Mexc`] spot server base url.
///
/// See docs: <https://mexcdevelop.github.io/apidocs/spot_v3_en/#websocket-market-streams>
pub const BASE_URL_MEXC: &str = "wss://wbs.mexc.com/ws";

/// [`Mexc`] server [`PingInterval`] duration. Connections without a valid subscription
/// or ping are closed after 60s.
pub const PING_INTERVAL_MEXC: Duration = Duration::from_secs(15);

/// Maximum streams per subscription request.
pub const SUBSCRIBE_BATCH_MEXC: usize = 25;

/// Channel prefix of the per-symbol mini ticker stream.
pub const CHANNEL_MINI_TICKER: &str = "spot@public.miniTicker.v3.api@";

/// [`Mexc`] spot `miniTicker` streams.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Mexc;

impl Mexc {
    fn requests(method: &str, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .chunks(SUBSCRIBE_BATCH_MEXC)
            .map(|batch| {
                let params = batch
                    .iter()
                    .map(|symbol| format!("{CHANNEL_MINI_TICKER}{symbol}USDT"))
                    .collect::<Vec<_>>();
                WsMessage::text(json!({ "method": method, "params": params }).to_string())
            })
            .collect()
    }
}

impl Connector for Mexc {
    fn feed(&self) -> FeedId {
        FeedId::Mexc
    }

    fn urls(&self) -> &'static [&'static str] {
        &[BASE_URL_MEXC]
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_MEXC,
            ping: || WsMessage::text(json!({ "method": "PING" }).to_string()),
        })
    }

    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("SUBSCRIPTION", symbols)
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("UNSUBSCRIPTION", symbols)
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        let message = serde_json::from_str::<MexcMessage>(text)
            .map_err(|error| DataError::deserialise(ExchangeId::Mexc, error))?;

        match message {
            MexcMessage::Push { channel, data } if channel.contains("miniTicker") => Ok(data
                .into_price(ctx)
                .map(|price| ConnectorEvent::Market(MarketEvent::Price(price)))
                .into_iter()
                .collect()),
            MexcMessage::Push { .. } => Ok(vec![]),
            MexcMessage::Response { msg } if msg.contains("Not Subscribed successfully") => {
                let rejected = rejected_streams(&msg);
                if rejected.is_empty() {
                    return Err(DataError::Rejected {
                        exchange: ExchangeId::Mexc,
                        message: msg,
                    });
                }
                Ok(rejected
                    .into_iter()
                    .map(|symbol| ConnectorEvent::Rejected {
                        symbol,
                        reason: msg.clone(),
                    })
                    .collect())
            }
            // PONG & successful subscription acks
            MexcMessage::Response { .. } => Ok(vec![]),
        }
    }
}

/// Extract rejected base assets from a MEXC subscribe failure (eg/ "Not Subscribed
/// successfully! [spot@public.miniTicker.v3.api@FOOUSDT]. Reason: Blocked!").
fn rejected_streams(msg: &str) -> Vec<Symbol> {
    msg.split(|c: char| c == '[' || c == ']' || c == ',' || c.is_whitespace())
        .filter_map(|stream| stream.strip_prefix(CHANNEL_MINI_TICKER))
        .filter_map(|market| market.split('@').next())
        .filter_map(|market| market.strip_suffix("USDT"))
        .filter(|base| !base.is_empty())
        .map(normalise_symbol)
        .collect()
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum MexcMessage {
    Push {
        #[serde(rename = "c")]
        channel: String,
        #[serde(rename = "d")]
        data: MexcMiniTicker,
    },
    Response {
        #[serde(default)]
        msg: String,
    },
}

/// ### Raw Payload Examples
/// See docs: <https://mexcdevelop.github.io/apidocs/spot_v3_en/#miniticker>
///```json
/// {
///     "s": "BTCUSDT",
///     "p": "36474.74",
///     "r": "0.0354",
///     "h": "36549.47",
///     "l": "35155.12",
///     "v": "1091.73",
///     "q": "39193640.42"
/// }
/// ```
///
/// Older payloads carry `c` (close) and `o` (open) instead of `p` and `r`; both forms are
/// accepted.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct MexcMiniTicker {
    #[serde(rename = "s")]
    pub market: String,

    #[serde(default)]
    pub p: serde_json::Value,

    #[serde(default)]
    pub c: serde_json::Value,

    #[serde(default)]
    pub o: serde_json::Value,

    #[serde(default)]
    pub r: serde_json::Value,

    #[serde(default)]
    pub h: serde_json::Value,

    #[serde(default)]
    pub l: serde_json::Value,

    #[serde(default)]
    pub q: serde_json::Value,
}

impl MexcMiniTicker {
    fn into_price(self, ctx: &ParseContext<'_>) -> Option<PricePoint> {
        let base = self.market.strip_suffix("USDT").filter(|base| !base.is_empty())?;

        let price = match lenient_f64(&self.p) {
            price if price > 0.0 => price,
            _ => lenient_f64(&self.c),
        };

        let change_rate = if self.r.is_null() {
            change_rate_from_open(price, lenient_f64(&self.o))
        } else {
            Some(lenient_f64(&self.r) * 100.0)
        };

        Some(
            PricePoint::new(ExchangeId::Mexc, base, Quote::Usdt, price, ctx.received)
                .with_change_24h_rate(change_rate)
                .with_volume_24h_quote(Some(lenient_f64(&self.q)))
                .with_high_low(positive(lenient_f64(&self.h)), positive(lenient_f64(&self.l))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{symbols, time_plus_secs};

    #[test]
    fn test_mexc_subscribe_batches_of_25() {
        let tracked = (0..26)
            .map(|index| Symbol::from(format!("S{index}")))
            .collect::<Vec<_>>();

        let requests = Mexc.subscribe(&tracked);
        assert_eq!(requests.len(), 2);

        let first: serde_json::Value =
            serde_json::from_str(requests[0].to_text().unwrap()).unwrap();
        assert_eq!(first["method"], "SUBSCRIPTION");
        assert_eq!(first["params"][0], "spot@public.miniTicker.v3.api@S0USDT");
    }

    #[test]
    fn test_mexc_parse() {
        let tracked = symbols(&["BTC"]);
        let received = time_plus_secs(0);
        let ctx = ParseContext {
            symbols: &tracked,
            received,
        };

        struct TestCase {
            input: &'static str,
            expected: Result<Vec<ConnectorEvent>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: PONG
                input: r#"{"id":0,"code":0,"msg":"PONG"}"#,
                expected: Ok(vec![]),
            },
            TestCase {
                // TC1: subscription rejected
                input: r#"{"id":0,"code":0,"msg":"Not Subscribed successfully! [spot@public.miniTicker.v3.api@FOOUSDT].  Reason： Blocked! "}"#,
                expected: Ok(vec![ConnectorEvent::Rejected {
                    symbol: Symbol::new("FOO"),
                    reason: "Not Subscribed successfully! [spot@public.miniTicker.v3.api@FOOUSDT].  Reason： Blocked! ".to_string(),
                }]),
            },
            TestCase {
                // TC2: legacy close/open payload
                input: r#"{"c":"spot@public.miniTicker.v3.api@BTCUSDT@UTC+8","d":{"s":"BTCUSDT","c":"110","o":"100","h":"120","l":"90","q":"1000"},"s":"BTCUSDT","t":1}"#,
                expected: Ok(vec![ConnectorEvent::Market(MarketEvent::Price(
                    PricePoint::new(ExchangeId::Mexc, "BTC", Quote::Usdt, 110.0, received)
                        .with_change_24h_rate(Some(10.0))
                        .with_volume_24h_quote(Some(1000.0))
                        .with_high_low(Some(120.0), Some(90.0)),
                ))]),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Mexc.parse(&ctx, test.input).map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
