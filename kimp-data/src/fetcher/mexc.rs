use crate::{
    error::DataError,
    fetcher::{
        DEFAULT_FETCH_TIMEOUT, Fetcher, binance::Binance24hrTicker, get_json, parse_endpoint,
        retain_tracked,
    },
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::Utc;
use fnv::FnvHashSet;
use reqwest::Client;

/// [`MexcFetcher`] 24hr ticker endpoint. Binance compatible schema, except
/// `priceChangePercent` is a fraction.
///
/// See docs: <https://mexcdevelop.github.io/apidocs/spot_v3_en/#24hr-ticker-price-change-statistics>
pub const URL_MEXC_24HR: &str = "https://api.mexc.com/api/v3/ticker/24hr";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct MexcFetcher;

#[async_trait]
impl Fetcher for MexcFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Mexc
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::Mexc, URL_MEXC_24HR)?;
        let tickers =
            get_json::<Vec<Binance24hrTicker>>(client, ExchangeId::Mexc, url, DEFAULT_FETCH_TIMEOUT)
                .await?;

        let received = Utc::now();
        Ok(retain_tracked(
            tickers.into_iter().filter_map(|ticker| {
                ticker.into_price(ExchangeId::Mexc, &[Quote::Usdt], 100.0, received)
            }),
            symbols,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_mexc_change_rate_scaled_from_fraction() {
        let input = r#"[{"symbol":"BTCUSDT","priceChange":"184.34","priceChangePercent":"0.00400048","prevClosePrice":"46079.37","lastPrice":"46263.71","bidPrice":"46260.38","askPrice":"46260.41","openPrice":"46079.37","highPrice":"47550.01","lowPrice":"45555.5","volume":"1732.461487","quoteVolume":null,"openTime":1641349500000,"closeTime":1641349582808,"count":null}]"#;
        let tickers = serde_json::from_str::<Vec<Binance24hrTicker>>(input).unwrap();

        let actual = tickers
            .into_iter()
            .filter_map(|ticker| {
                ticker.into_price(ExchangeId::Mexc, &[Quote::Usdt], 100.0, time_plus_secs(0))
            })
            .collect::<Vec<_>>();

        assert_eq!(actual[0].key().to_string(), "MEXC:BTC:USDT");
        assert!((actual[0].change_24h_rate.unwrap() - 0.400048).abs() < 1e-9);
        // null quote volume is treated as unknown
        assert_eq!(actual[0].volume_24h_quote, None);
    }
}
