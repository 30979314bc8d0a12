use crate::{
    error::DataError,
    exchange::okx::OkxTicker,
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, endpoint, get_json, retain_tracked},
    model::{ExchangeId, PricePoint, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use reqwest::Client;
use serde::Deserialize;

/// [`OkxFetcher`] market tickers endpoint.
///
/// See docs: <https://www.okx.com/docs-v5/en/#order-book-trading-market-data-get-tickers>
pub const URL_OKX_TICKERS: &str = "https://www.okx.com/api/v5/market/tickers";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct OkxFetcher;

#[async_trait]
impl Fetcher for OkxFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = endpoint(ExchangeId::Okx, URL_OKX_TICKERS, &[("instType", "SPOT")])?;
        let response =
            get_json::<OkxRestResponse>(client, ExchangeId::Okx, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        parse_okx_response(response, Utc::now()).map(|points| retain_tracked(points, symbols))
    }
}

/// Parse an OKX REST envelope; tickers share the streaming `tickers` channel schema.
pub fn parse_okx_response(
    response: OkxRestResponse,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.code != "0" {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Okx,
            message: format!("code {}: {}", response.code, response.msg),
        });
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(|ticker| ticker.into_price(received))
        .collect())
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxRestResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<OkxTicker>,
}
