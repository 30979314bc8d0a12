use crate::{
    error::DataError,
    exchange::gate::GateTicker,
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, get_json, parse_endpoint, retain_tracked},
    model::{ExchangeId, PricePoint, Symbol},
};
use async_trait::async_trait;
use chrono::Utc;
use fnv::FnvHashSet;
use reqwest::Client;

/// [`GateFetcher`] spot tickers endpoint. Tickers share the streaming `spot.tickers`
/// schema.
///
/// See docs: <https://www.gate.io/docs/developers/apiv4/en/#retrieve-ticker-information>
pub const URL_GATE_TICKERS: &str = "https://api.gateio.ws/api/v4/spot/tickers";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GateFetcher;

#[async_trait]
impl Fetcher for GateFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Gate
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Gate, URL_GATE_TICKERS)?;
        let tickers =
            get_json::<Vec<GateTicker>>(client, ExchangeId::Gate, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        let received = Utc::now();
        Ok(retain_tracked(
            tickers
                .into_iter()
                .filter_map(|ticker| ticker.into_price(received)),
            symbols,
        ))
    }
}
