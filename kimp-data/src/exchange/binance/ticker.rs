use super::strip_usdt;
use crate::{
    exchange::{ParseContext, change_rate_from_open, de_lenient_f64, positive},
    model::{ExchangeId, PricePoint, Quote, normalise_symbol},
};
use serde::{Deserialize, Serialize};

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#all-market-mini-tickers-stream>
/// One element of the `!miniTicker@arr` array:
///```json
/// {
///     "e": "24hrMiniTicker",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "c": "16569.01",
///     "o": "16500.00",
///     "h": "16600.00",
///     "l": "16400.00",
///     "v": "1000",
///     "q": "18000000"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceMiniTicker {
    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "c", default, deserialize_with = "de_lenient_f64")]
    pub close: f64,

    #[serde(rename = "o", default, deserialize_with = "de_lenient_f64")]
    pub open: f64,

    #[serde(rename = "h", default, deserialize_with = "de_lenient_f64")]
    pub high: f64,

    #[serde(rename = "l", default, deserialize_with = "de_lenient_f64")]
    pub low: f64,

    #[serde(rename = "q", default, deserialize_with = "de_lenient_f64")]
    pub quote_volume: f64,
}

impl BinanceMiniTicker {
    /// Convert into a USDT-quoted [`PricePoint`] if the market is tracked.
    pub fn into_price(self, exchange: ExchangeId, ctx: &ParseContext<'_>) -> Option<PricePoint> {
        let base = normalise_symbol(strip_usdt(&self.market)?);
        if !ctx.symbols.contains(&base) {
            return None;
        }

        Some(
            PricePoint::new(exchange, &base, Quote::Usdt, self.close, ctx.received)
                .with_change_24h_rate(change_rate_from_open(self.close, self.open))
                .with_volume_24h_quote(Some(self.quote_volume))
                .with_high_low(positive(self.high), positive(self.low)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exchange::{Connector, ConnectorEvent, binance::BinanceSpot},
        model::MarketEvent,
        test_utils::{symbols, time_plus_secs},
    };

    #[test]
    fn test_binance_spot_parse_mini_ticker_array() {
        let tracked = symbols(&["BTC", "ETH"]);
        let ctx = ParseContext {
            symbols: &tracked,
            received: time_plus_secs(0),
        };

        struct TestCase {
            input: &'static str,
            expected: Vec<(String, f64, Option<f64>)>,
        }

        let tests = vec![
            TestCase {
                // TC0: tracked USDT market is emitted with change rate from open
                input: r#"[{"e":"24hrMiniTicker","E":1,"s":"BTCUSDT","c":"110","o":"100","h":"120","l":"90","v":"1","q":"5000"}]"#,
                expected: vec![("BTC".to_string(), 110.0, Some(10.0))],
            },
            TestCase {
                // TC1: untracked & non-USDT markets are filtered
                input: r#"[{"s":"DOGEUSDT","c":"1","o":"1","h":"1","l":"1","q":"1"},{"s":"ETHBTC","c":"0.05","o":"0.05","h":"1","l":"1","q":"1"}]"#,
                expected: vec![],
            },
            TestCase {
                // TC2: malformed numeric fields become zero, zero open yields no change rate
                input: r#"[{"s":"ETHUSDT","c":"abc","o":"","h":"1","l":"1","q":"x"}]"#,
                expected: vec![("ETH".to_string(), 0.0, None)],
            },
            TestCase {
                // TC3: non-array frames are ignored
                input: r#"{"result":null,"id":1}"#,
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = BinanceSpot
                .parse(&ctx, test.input)
                .unwrap()
                .into_iter()
                .map(|event| match event {
                    ConnectorEvent::Market(MarketEvent::Price(price)) => {
                        (price.symbol.to_string(), price.price, price.change_24h_rate)
                    }
                    other => panic!("TC{index} unexpected event: {other:?}"),
                })
                .collect::<Vec<_>>();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_binance_spot_parse_invalid_json_is_error() {
        let tracked = symbols(&["BTC"]);
        let ctx = ParseContext {
            symbols: &tracked,
            received: time_plus_secs(0),
        };
        assert!(BinanceSpot.parse(&ctx, "[not json").is_err());
    }
}
