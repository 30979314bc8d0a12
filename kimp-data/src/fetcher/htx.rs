use crate::{
    error::DataError,
    exchange::{change_rate_from_open, de_lenient_f64, positive},
    fetcher::{
        DEFAULT_FETCH_TIMEOUT, Fetcher, binance::split_concatenated, get_json, parse_endpoint,
        retain_tracked,
    },
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// [`HtxFetcher`] all market tickers endpoint.
///
/// See docs: <https://www.htx.com/en-us/opend/newApiPages/?id=7ec4a4da-7773-11ed-9966-0242ac110003>
pub const URL_HTX_TICKERS: &str = "https://api.huobi.pro/market/tickers";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct HtxFetcher;

#[async_trait]
impl Fetcher for HtxFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Htx
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Htx, URL_HTX_TICKERS)?;
        let response =
            get_json::<HtxResponse>(client, ExchangeId::Htx, url, DEFAULT_FETCH_TIMEOUT).await?;

        parse_htx_response(response, Utc::now()).map(|points| retain_tracked(points, symbols))
    }
}

pub fn parse_htx_response(
    response: HtxResponse,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.status != "ok" {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Htx,
            message: format!(
                "status {}: {}",
                response.status,
                response.err_msg.unwrap_or_default()
            ),
        });
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(|ticker| {
            // HTX symbols are lower case (eg/ "btcusdt")
            let market = ticker.symbol.to_uppercase();
            let (base, quote) = split_concatenated(&market, &[Quote::Usdt])?;
            Some(
                PricePoint::new(ExchangeId::Htx, base, quote, ticker.close, received)
                    .with_change_24h_rate(change_rate_from_open(ticker.close, ticker.open))
                    .with_volume_24h_quote(Some(ticker.vol))
                    .with_high_low(positive(ticker.high), positive(ticker.low)),
            )
        })
        .collect())
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HtxResponse {
    pub status: String,
    #[serde(default)]
    pub err_msg: Option<String>,
    #[serde(default)]
    pub data: Vec<HtxTicker>,
}

/// ### Raw Payload Examples
/// `vol` is the 24h quote-currency turnover.
///```json
/// {
///     "symbol": "btcusdt",
///     "open": 65000.0,
///     "high": 67000.0,
///     "low": 64500.0,
///     "close": 66300.0,
///     "amount": 1523.2,
///     "vol": 100912345.6,
///     "count": 812345
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct HtxTicker {
    pub symbol: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub open: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub close: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub vol: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_parse_htx_response() {
        struct TestCase {
            input: &'static str,
            expected: Result<Vec<(Symbol, f64)>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: lower case symbols normalised, non-USDT markets dropped
                input: r#"{"status":"ok","ts":1700000000000,"data":[{"symbol":"btcusdt","open":65000.0,"high":67000.0,"low":64500.0,"close":66300.0,"amount":1523.2,"vol":100912345.6,"count":812345},{"symbol":"ethbtc","close":0.05}]}"#,
                expected: Ok(vec![(Symbol::new("BTC"), 66300.0)]),
            },
            TestCase {
                // TC1: error status
                input: r#"{"status":"error","err-code":"invalid-parameter","err-msg":"invalid symbol"}"#,
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let response = serde_json::from_str::<HtxResponse>(test.input).unwrap();
            let actual = parse_htx_response(response, time_plus_secs(0))
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
    fn test_parse_htx_change_rate() {
        let input = r#"{"status":"ok","data":[{"symbol":"xrpusdt","open":0.5,"high":0.6,"low":0.49,"close":0.55,"vol":1000.0}]}"#;
        let response = serde_json::from_str::<HtxResponse>(input).unwrap();
        let actual = parse_htx_response(response, time_plus_secs(0)).unwrap();

        assert!((actual[0].change_24h_rate.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(actual[0].volume_24h_quote, Some(1000.0));
    }
}
