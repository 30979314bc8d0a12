use crate::{
    error::DataError,
    exchange::{change_rate_from_open, de_lenient_f64, positive},
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, get_json, parse_endpoint, retain_tracked},
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// [`CoinoneFetcher`] KRW market tickers.
///
/// See docs: <https://docs.coinone.co.kr/reference/tickers>
pub const URL_COINONE_TICKERS: &str = "https://api.coinone.co.kr/public/v2/ticker_new/KRW";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CoinoneFetcher;

#[async_trait]
impl Fetcher for CoinoneFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Coinone
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Coinone, URL_COINONE_TICKERS)?;
        let response =
            get_json::<CoinoneResponse>(client, ExchangeId::Coinone, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        parse_coinone_response(response, Utc::now()).map(|points| retain_tracked(points, symbols))
    }
}

pub fn parse_coinone_response(
    response: CoinoneResponse,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.result != "success" {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Coinone,
            message: format!("result {}: error_code {}", response.result, response.error_code),
        });
    }

    Ok(response
        .tickers
        .into_iter()
        .filter(|ticker| ticker.quote_currency.eq_ignore_ascii_case("krw"))
        .map(|ticker| {
            PricePoint::new(
                ExchangeId::Coinone,
                &ticker.target_currency,
                Quote::Krw,
                ticker.last,
                received,
            )
            .with_change_24h_rate(change_rate_from_open(ticker.last, ticker.first))
            .with_volume_24h_quote(Some(ticker.quote_volume))
            .with_high_low(positive(ticker.high), positive(ticker.low))
        })
        .collect())
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct CoinoneResponse {
    pub result: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub tickers: Vec<CoinoneTicker>,
}

/// ### Raw Payload Examples
/// See docs: <https://docs.coinone.co.kr/reference/tickers>
///```json
/// {
///     "quote_currency": "KRW",
///     "target_currency": "BTC",
///     "timestamp": 1700000000000,
///     "high": "95500000",
///     "low": "93800000",
///     "first": "94000000",
///     "last": "95000000",
///     "quote_volume": "21000000000",
///     "target_volume": "221.3"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct CoinoneTicker {
    pub quote_currency: String,
    pub target_currency: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub first: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub quote_volume: f64,
}
