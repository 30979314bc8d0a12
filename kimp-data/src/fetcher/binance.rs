use crate::{
    error::DataError,
    exchange::{de_lenient_f64, positive},
    fetcher::{DEFAULT_FETCH_TIMEOUT, Fetcher, get_json, parse_endpoint, retain_tracked},
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// [`BinanceSpotFetcher`] 24hr ticker statistics for every symbol.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#24hr-ticker-price-change-statistics>
pub const URL_BINANCE_SPOT_24HR: &str = "https://api.binance.com/api/v3/ticker/24hr";

/// [`BinanceFuturesFetcher`] 24hr ticker statistics for every USDT-M perpetual.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/24hr-Ticker-Price-Change-Statistics>
pub const URL_BINANCE_FUTURES_24HR: &str = "https://fapi.binance.com/fapi/v1/ticker/24hr";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BinanceSpotFetcher;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BinanceFuturesFetcher;

#[async_trait]
impl Fetcher for BinanceSpotFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::BinanceSpot
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::BinanceSpot, URL_BINANCE_SPOT_24HR)?;
        let tickers = get_json::<Vec<Binance24hrTicker>>(
            client,
            ExchangeId::BinanceSpot,
            url,
            DEFAULT_FETCH_TIMEOUT,
        )
        .await?;

        let received = Utc::now();
        Ok(retain_tracked(
            tickers.into_iter().filter_map(|ticker| {
                ticker.into_price(ExchangeId::BinanceSpot, &[Quote::Usdt, Quote::Btc], 1.0, received)
            }),
            symbols,
        ))
    }
}

#[async_trait]
impl Fetcher for BinanceFuturesFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::BinanceFutures
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let url = parse_endpoint(ExchangeId::BinanceFutures, URL_BINANCE_FUTURES_24HR)?;
        let tickers = get_json::<Vec<Binance24hrTicker>>(
            client,
            ExchangeId::BinanceFutures,
            url,
            DEFAULT_FETCH_TIMEOUT,
        )
        .await?;

        let received = Utc::now();
        Ok(retain_tracked(
            tickers.into_iter().filter_map(|ticker| {
                ticker.into_price(ExchangeId::BinanceFutures, &[Quote::Usdt], 1.0, received)
            }),
            symbols,
        ))
    }
}

/// Split a concatenated market symbol (eg/ "ETHBTC") into base & [`Quote`], trying each
/// accepted quote suffix in order.
pub(crate) fn split_concatenated<'a>(market: &'a str, quotes: &[Quote]) -> Option<(&'a str, Quote)> {
    quotes.iter().find_map(|quote| {
        let suffix = match quote {
            Quote::Usdt => "USDT",
            Quote::Btc => "BTC",
            Quote::Krw => "KRW",
        };
        market
            .strip_suffix(suffix)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}

/// ### Raw Payload Examples
/// Shared by Binance spot, Binance futures & MEXC.
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#24hr-ticker-price-change-statistics>
///```json
/// {
///     "symbol": "BNBBTC",
///     "priceChange": "-94.99999800",
///     "priceChangePercent": "-95.960",
///     "lastPrice": "4.00000200",
///     "openPrice": "99.00000000",
///     "highPrice": "100.00000000",
///     "lowPrice": "0.10000000",
///     "volume": "8913.30000000",
///     "quoteVolume": "15.30000000"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binance24hrTicker {
    pub symbol: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub price_change_percent: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub quote_volume: f64,
}

impl Binance24hrTicker {
    /// Convert into a [`PricePoint`] if the symbol ends with one of the accepted `quotes`.
    ///
    /// `percent_scale` converts `priceChangePercent` into a percentage (1.0 for Binance,
    /// 100.0 for venues reporting a fraction).
    pub fn into_price(
        self,
        exchange: ExchangeId,
        quotes: &[Quote],
        percent_scale: f64,
        received: DateTime<Utc>,
    ) -> Option<PricePoint> {
        let (base, quote) = split_concatenated(&self.symbol, quotes)?;

        Some(
            PricePoint::new(exchange, base, quote, self.last_price, received)
                .with_change_24h_rate(Some(self.price_change_percent * percent_scale))
                .with_volume_24h_quote(positive(self.quote_volume))
                .with_high_low(positive(self.high_price), positive(self.low_price)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_split_concatenated() {
        struct TestCase {
            input: &'static str,
            quotes: &'static [Quote],
            expected: Option<(&'static str, Quote)>,
        }

        let tests = vec![
            TestCase {
                // TC0: USDT market
                input: "BTCUSDT",
                quotes: &[Quote::Usdt, Quote::Btc],
                expected: Some(("BTC", Quote::Usdt)),
            },
            TestCase {
                // TC1: BTC market
                input: "ETHBTC",
                quotes: &[Quote::Usdt, Quote::Btc],
                expected: Some(("ETH", Quote::Btc)),
            },
            TestCase {
                // TC2: BTC market not accepted
                input: "ETHBTC",
                quotes: &[Quote::Usdt],
                expected: None,
            },
            TestCase {
                // TC3: delivery contract suffix
                input: "BTCUSDT_250328",
                quotes: &[Quote::Usdt],
                expected: None,
            },
            TestCase {
                // TC4: quote only
                input: "USDT",
                quotes: &[Quote::Usdt],
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = split_concatenated(test.input, test.quotes);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_binance_24hr_ticker_into_price() {
        let input = r#"[
            {"symbol":"BTCUSDT","priceChange":"1000","priceChangePercent":"1.523","lastPrice":"66660.00","openPrice":"65660.00","highPrice":"67000.00","lowPrice":"65000.00","volume":"100.0","quoteVolume":"6666000.00"},
            {"symbol":"ETHBTC","priceChangePercent":"-0.5","lastPrice":"0.0523","highPrice":"0.0530","lowPrice":"0.0519","quoteVolume":"1200.5"},
            {"symbol":"BTCEUR","lastPrice":"60000"}
        ]"#;
        let tickers = serde_json::from_str::<Vec<Binance24hrTicker>>(input).unwrap();

        let actual = tickers
            .into_iter()
            .filter_map(|ticker| {
                ticker.into_price(
                    ExchangeId::BinanceSpot,
                    &[Quote::Usdt, Quote::Btc],
                    1.0,
                    time_plus_secs(0),
                )
            })
            .collect::<Vec<_>>();

        assert_eq!(actual.len(), 2);
        assert_eq!(actual[0].key().to_string(), "BINANCE:BTC:USDT");
        assert_eq!(actual[0].change_24h_rate, Some(1.523));
        assert_eq!(actual[0].volume_24h_quote, Some(6_666_000.0));
        assert_eq!(actual[1].key().to_string(), "BINANCE:ETH:BTC");
        assert_eq!(actual[1].price, 0.0523);
    }
}
