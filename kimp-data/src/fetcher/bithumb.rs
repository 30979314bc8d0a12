use crate::{
    error::DataError,
    exchange::{de_lenient_f64, positive},
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, get_json, parse_endpoint, retain_tracked},
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// [`BithumbFetcher`] KRW market tickers.
///
/// See docs: <https://apidocs.bithumb.com/>
pub const URL_BITHUMB_ALL_KRW: &str = "https://api.bithumb.com/public/ticker/ALL_KRW";

/// [`BithumbFetcher`] BTC market tickers.
pub const URL_BITHUMB_ALL_BTC: &str = "https://api.bithumb.com/public/ticker/ALL_BTC";

/// Bithumb success status code.
pub const STATUS_OK_BITHUMB: &str = "0000";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BithumbFetcher;

impl BithumbFetcher {
    async fn fetch_quote(
        client: &Client,
        base: &str,
        quote: Quote,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Bithumb, base)?;
        let response =
            get_json::<BithumbResponse>(client, ExchangeId::Bithumb, url, DEFAULT_FETCH_TIMEOUT)
                .await?;
        parse_bithumb_response(response, quote, Utc::now())
    }
}

#[async_trait]
impl Fetcher for BithumbFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bithumb
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let (krw, btc) = tokio::join!(
            Self::fetch_quote(client, URL_BITHUMB_ALL_KRW, Quote::Krw),
            Self::fetch_quote(client, URL_BITHUMB_ALL_BTC, Quote::Btc),
        );

        // KRW markets are required, BTC markets only enrich the volume fallback
        let mut points = krw?;
        match btc {
            Ok(btc) => points.extend(btc),
            Err(error) => {
                warn!(exchange = %ExchangeId::Bithumb, %error, "BTC market tickers unavailable")
            }
        }

        Ok(retain_tracked(points, symbols))
    }
}

pub fn parse_bithumb_response(
    response: BithumbResponse,
    quote: Quote,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.status != STATUS_OK_BITHUMB {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Bithumb,
            message: format!(
                "status {}: {}",
                response.status,
                response.message.unwrap_or_default()
            ),
        });
    }

    let mut points = response
        .data
        .into_iter()
        // "date" and other non-ticker entries share the map
        .filter(|(_, value)| value.is_object())
        .filter_map(|(base, value)| {
            let ticker = serde_json::from_value::<BithumbTicker>(value).ok()?;
            Some(
                PricePoint::new(ExchangeId::Bithumb, &base, quote, ticker.closing_price, received)
                    .with_change_24h_rate(Some(ticker.fluctate_rate_24h))
                    .with_volume_24h_quote(Some(ticker.acc_trade_value_24h))
                    .with_high_low(positive(ticker.max_price), positive(ticker.min_price)),
            )
        })
        .collect::<Vec<_>>();

    points.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(points)
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BithumbResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: FnvHashMap<String, serde_json::Value>,
}

/// ### Raw Payload Examples
/// See docs: <https://apidocs.bithumb.com/>
///```json
/// {
///     "status": "0000",
///     "data": {
///         "BTC": {
///             "opening_price": "94000000",
///             "closing_price": "95000000",
///             "min_price": "93800000",
///             "max_price": "95500000",
///             "units_traded_24H": "1234.5",
///             "acc_trade_value_24H": "117000000000",
///             "fluctate_rate_24H": "1.06"
///         },
///         "date": "1700000000000"
///     }
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BithumbTicker {
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub closing_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub min_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub max_price: f64,

    #[serde(rename = "acc_trade_value_24H", default, deserialize_with = "de_lenient_f64")]
    pub acc_trade_value_24h: f64,

    #[serde(rename = "fluctate_rate_24H", default, deserialize_with = "de_lenient_f64")]
    pub fluctate_rate_24h: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_parse_bithumb_response() {
        struct TestCase {
            input: &'static str,
            expected: Result<Vec<(Symbol, f64)>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: tickers parsed, "date" entry skipped
                input: r#"{"status":"0000","data":{"BTC":{"closing_price":"95000000","min_price":"93800000","max_price":"95500000","acc_trade_value_24H":"117000000000","fluctate_rate_24H":"1.06"},"ETH":{"closing_price":"3500000"},"date":"1700000000000"}}"#,
                expected: Ok(vec![
                    (Symbol::new("BTC"), 95_000_000.0),
                    (Symbol::new("ETH"), 3_500_000.0),
                ]),
            },
            TestCase {
                // TC1: error status
                input: r#"{"status":"5600","message":"Please try again"}"#,
                expected: Err(()),
            },
            TestCase {
                // TC2: malformed price kept as invalid point
                input: r#"{"status":"0000","data":{"XRP":{"closing_price":"-"}}}"#,
                expected: Ok(vec![(Symbol::new("XRP"), 0.0)]),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let response = serde_json::from_str::<BithumbResponse>(test.input).unwrap();
            let actual = parse_bithumb_response(response, Quote::Krw, time_plus_secs(0))
                .map(|points| {
                    points
                        .into_iter()
                        .map(|point| (point.symbol, point.price))
                        .collect::<Vec<_>>()
                })
                .map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_bithumb_response_statistics() {
        let input = r#"{"status":"0000","data":{"BTC":{"closing_price":"95000000","min_price":"93800000","max_price":"95500000","acc_trade_value_24H":"117000000000","fluctate_rate_24H":"1.06"}}}"#;
        let response = serde_json::from_str::<BithumbResponse>(input).unwrap();
        let actual = parse_bithumb_response(response, Quote::Krw, time_plus_secs(0)).unwrap();

        assert_eq!(actual[0].change_24h_rate, Some(1.06));
        assert_eq!(actual[0].volume_24h_quote, Some(117_000_000_000.0));
        assert_eq!(actual[0].high_24h, Some(95_500_000.0));
        assert_eq!(actual[0].low_24h, Some(93_800_000.0));
    }
}
