use crate::{
    error::DataError,
    model::{ExchangeId, PricePoint, Symbol},
};
use async_trait::async_trait;
use fnv::FnvHashSet;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc, time::Duration};
use url::Url;

/// Upbit KRW, BTC & USDT market tickers.
pub mod upbit;

/// Bithumb `ALL_KRW` & `ALL_BTC` tickers.
pub mod bithumb;

/// Coinone KRW tickers.
pub mod coinone;

/// Binance spot & USDT-M futures 24hr tickers.
pub mod binance;

/// OKX spot tickers.
pub mod okx;

/// Bybit spot tickers.
pub mod bybit;

/// Bitget spot tickers.
pub mod bitget;

/// Gate spot tickers.
pub mod gate;

/// HTX spot tickers.
pub mod htx;

/// MEXC spot 24hr tickers.
pub mod mexc;

/// Default per-request timeout for REST snapshot requests.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// REST snapshot client returning price & 24h statistics for one exchange.
///
/// Fetchers are independent of the streaming connectors: a failing WebSocket never
/// prevents polling, and a failing fetcher never aborts a polling cycle.
#[async_trait]
pub trait Fetcher: Debug + Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Fetch the latest [`PricePoint`]s for the tracked `symbols`. An empty set means
    /// every market the exchange lists.
    ///
    /// Malformed numeric fields are kept as zero priced points so callers can detect
    /// degraded payloads.
    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError>;
}

/// Every domestic & foreign [`Fetcher`], domestic first.
pub fn default_fetchers() -> Vec<Arc<dyn Fetcher>> {
    vec![
        Arc::new(upbit::UpbitFetcher::default()),
        Arc::new(bithumb::BithumbFetcher),
        Arc::new(coinone::CoinoneFetcher),
        Arc::new(binance::BinanceSpotFetcher),
        Arc::new(binance::BinanceFuturesFetcher),
        Arc::new(okx::OkxFetcher),
        Arc::new(bybit::BybitFetcher),
        Arc::new(bitget::BitgetFetcher),
        Arc::new(gate::GateFetcher),
        Arc::new(htx::HtxFetcher),
        Arc::new(mexc::MexcFetcher),
    ]
}

/// Construct the shared [`Client`] used by every [`Fetcher`].
pub fn rest_client() -> Result<Client, DataError> {
    Client::builder()
        .user_agent(concat!("kimp/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(DataError::from)
}

/// Parse a static endpoint without query parameters.
pub(crate) fn parse_endpoint(exchange: ExchangeId, base: &str) -> Result<Url, DataError> {
    Url::parse(base).map_err(|error| invalid_endpoint(exchange, base, error))
}

/// Parse a static endpoint, attaching `params` as url-encoded query parameters.
pub(crate) fn endpoint<I, K, V>(
    exchange: ExchangeId,
    base: &str,
    params: I,
) -> Result<Url, DataError>
where
    I: IntoIterator,
    I::Item: std::borrow::Borrow<(K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    Url::parse_with_params(base, params).map_err(|error| invalid_endpoint(exchange, base, error))
}

fn invalid_endpoint(exchange: ExchangeId, base: &str, error: url::ParseError) -> DataError {
    DataError::Rejected {
        exchange,
        message: format!("invalid endpoint {base}: {error}"),
    }
}

/// Send a GET request and deserialise the JSON body.
///
/// Non-success statuses map to [`DataError::HttpStatus`] so a 451 is recognised as a
/// regional block.
pub(crate) async fn get_json<T>(
    client: &Client,
    exchange: ExchangeId,
    url: Url,
    timeout: Duration,
) -> Result<T, DataError>
where
    T: DeserializeOwned,
{
    let response = client.get(url).timeout(timeout).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DataError::HttpStatus {
            exchange,
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    serde_json::from_str::<T>(&body).map_err(|error| DataError::deserialise(exchange, error))
}

/// Retain only points for tracked symbols (every point when `symbols` is empty).
pub(crate) fn retain_tracked(
    points: impl IntoIterator<Item = PricePoint>,
    symbols: &FnvHashSet<Symbol>,
) -> Vec<PricePoint> {
    points
        .into_iter()
        .filter(|point| symbols.is_empty() || symbols.contains(&point.symbol))
        .collect()
}
