use crate::{
    error::DataError,
    exchange::{de_lenient_f64, positive},
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

/// [`BitgetFetcher`] spot tickers endpoint.
///
/// See docs: <https://www.bitget.com/api-doc/spot/market/Get-Tickers>
pub const URL_BITGET_TICKERS: &str = "https://api.bitget.com/api/v2/spot/market/tickers";

/// Bitget success response code.
pub const CODE_OK_BITGET: &str = "00000";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BitgetFetcher;

#[async_trait]
impl Fetcher for BitgetFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Bitget, URL_BITGET_TICKERS)?;
        let response =
            get_json::<BitgetResponse>(client, ExchangeId::Bitget, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        parse_bitget_response(response, Utc::now()).map(|points| retain_tracked(points, symbols))
    }
}

pub fn parse_bitget_response(
    response: BitgetResponse,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.code != CODE_OK_BITGET {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Bitget,
            message: format!("code {}: {}", response.code, response.msg),
        });
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(|ticker| {
            let (base, quote) = split_concatenated(&ticker.symbol, &[Quote::Usdt])?;
            Some(
                PricePoint::new(ExchangeId::Bitget, base, quote, ticker.last_pr, received)
                    .with_change_24h_rate(Some(ticker.change_24h * 100.0))
                    .with_volume_24h_quote(Some(ticker.quote_volume))
                    .with_high_low(positive(ticker.high_24h), positive(ticker.low_24h)),
            )
        })
        .collect())
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BitgetResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<BitgetTicker>,
}

/// ### Raw Payload Examples
/// See docs: <https://www.bitget.com/api-doc/spot/market/Get-Tickers>
///```json
/// {
///     "symbol": "BTCUSDT",
///     "high24h": "37775.65",
///     "open": "35134.2",
///     "low24h": "34413.1",
///     "lastPr": "34413.1",
///     "quoteVolume": "0",
///     "baseVolume": "0",
///     "change24h": "0.00246"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BitgetTicker {
    pub symbol: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last_pr: f64,

    #[serde(rename = "high24h", default, deserialize_with = "de_lenient_f64")]
    pub high_24h: f64,

    #[serde(rename = "low24h", default, deserialize_with = "de_lenient_f64")]
    pub low_24h: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub quote_volume: f64,

    /// Fractional change (eg/ 0.00246 == 0.246%).
    #[serde(rename = "change24h", default, deserialize_with = "de_lenient_f64")]
    pub change_24h: f64,
}
