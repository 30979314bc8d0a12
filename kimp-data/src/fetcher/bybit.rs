use crate::{
    error::DataError,
    exchange::bybit::BybitTicker,
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, endpoint, get_json, retain_tracked},
    model::{ExchangeId, PricePoint, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use reqwest::Client;
use serde::Deserialize;

/// [`BybitFetcher`] market tickers endpoint.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/market/tickers>
pub const URL_BYBIT_TICKERS: &str = "https://api.bybit.com/v5/market/tickers";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BybitFetcher;

#[async_trait]
impl Fetcher for BybitFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = endpoint(ExchangeId::Bybit, URL_BYBIT_TICKERS, &[("category", "spot")])?;
        let response =
            get_json::<BybitRestResponse>(client, ExchangeId::Bybit, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        parse_bybit_response(response, Utc::now()).map(|points| retain_tracked(points, symbols))
    }
}

pub fn parse_bybit_response(
    response: BybitRestResponse,
    received: DateTime<Utc>,
) -> Result<Vec<PricePoint>, DataError> {
    if response.ret_code != 0 {
        return Err(DataError::Rejected {
            exchange: ExchangeId::Bybit,
            message: format!("retCode {}: {}", response.ret_code, response.ret_msg),
        });
    }

    Ok(response
        .result
        .list
        .into_iter()
        .filter_map(|ticker| ticker.into_price(received))
        .collect())
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitRestResponse {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: BybitTickerList,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct BybitTickerList {
    #[serde(default)]
    pub list: Vec<BybitTicker>,
}
