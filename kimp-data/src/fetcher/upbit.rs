use crate::{
    error::DataError,
    exchange::{de_lenient_f64, positive},
    fetcher::{Fetcher, endpoint, get_json, retain_tracked},
    model::{ExchangeId, PricePoint, Quote, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashSet;
use futures::future::join_all;
use itertools::Itertools;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// [`UpbitFetcher`] market list endpoint.
///
/// See docs: <https://global-docs.upbit.com/reference/listing-market-list>
pub const URL_UPBIT_MARKETS: &str = "https://api.upbit.com/v1/market/all";

/// [`UpbitFetcher`] ticker endpoint.
///
/// See docs: <https://global-docs.upbit.com/reference/tickers>
pub const URL_UPBIT_TICKER: &str = "https://api.upbit.com/v1/ticker";

/// Maximum market codes per ticker request.
pub const UPBIT_MARKETS_PER_REQUEST: usize = 200;

/// Upbit ticker requests are retried once after this delay.
pub const UPBIT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub const UPBIT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a discovered market list is reused before re-discovery.
pub const UPBIT_MARKETS_TTL: TimeDelta = TimeDelta::hours(1);

/// Upbit REST ticker client. Unknown market codes fail the whole request, so the listed
/// markets are discovered first and cached.
#[derive(Debug, Default)]
pub struct UpbitFetcher {
    markets: RwLock<Option<(DateTime<Utc>, Vec<String>)>>,
}

impl UpbitFetcher {
    async fn markets(&self, client: &Client) -> Result<Vec<String>, DataError> {
        let now = Utc::now();
        if let Some((fetched, markets)) = self.markets.read().as_ref() {
            if now - *fetched < UPBIT_MARKETS_TTL {
                return Ok(markets.clone());
            }
        }

        let url = endpoint(ExchangeId::Upbit, URL_UPBIT_MARKETS, &[("isDetails", "false")])?;
        let listed = get_json::<Vec<UpbitMarket>>(client, ExchangeId::Upbit, url, UPBIT_TIMEOUT)
            .await?
            .into_iter()
            .map(|market| market.market)
            .filter(|market| parse_market(market).is_some())
            .collect::<Vec<_>>();

        debug!(exchange = %ExchangeId::Upbit, markets = listed.len(), "discovered markets");
        *self.markets.write() = Some((now, listed.clone()));
        Ok(listed)
    }

    async fn fetch_chunk(
        client: &Client,
        markets: &[&String],
    ) -> Result<Vec<UpbitTicker>, DataError> {
        let codes = markets.iter().join(",");
        let url = endpoint(ExchangeId::Upbit, URL_UPBIT_TICKER, &[("markets", codes)])?;

        match get_json(client, ExchangeId::Upbit, url.clone(), UPBIT_TIMEOUT).await {
            Ok(tickers) => Ok(tickers),
            Err(error) => {
                debug!(exchange = %ExchangeId::Upbit, %error, "retrying ticker request");
                tokio::time::sleep(UPBIT_RETRY_DELAY).await;
                get_json(client, ExchangeId::Upbit, url, UPBIT_TIMEOUT).await
            }
        }
    }
}

#[async_trait]
impl Fetcher for UpbitFetcher {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Upbit
    }

    async fn fetch(
        &self,
        client: &Client,
        symbols: &FnvHashSet<Symbol>,
    ) -> Result<Vec<PricePoint>, DataError> {
        let markets = self.markets(client).await?;
        let tracked = markets
            .iter()
            .filter(|market| {
                parse_market(market)
                    .is_some_and(|(base, _)| symbols.is_empty() || symbols.contains(base))
            })
            .collect::<Vec<_>>();

        let chunks = join_all(
            tracked
                .chunks(UPBIT_MARKETS_PER_REQUEST)
                .map(|chunk| Self::fetch_chunk(client, chunk)),
        )
        .await;

        let received = Utc::now();
        let mut tickers = Vec::with_capacity(tracked.len());
        let mut last_error = None;
        for chunk in chunks {
            match chunk {
                Ok(chunk) => tickers.extend(chunk),
                Err(error) => {
                    warn!(exchange = %ExchangeId::Upbit, %error, "ticker chunk failed");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if tickers.is_empty() => Err(error),
            _ => Ok(retain_tracked(parse_upbit_tickers(tickers, received), symbols)),
        }
    }
}

/// Split an Upbit market code (eg/ "KRW-BTC") into base symbol & [`Quote`].
fn parse_market(market: &str) -> Option<(&str, Quote)> {
    let (quote, base) = market.split_once('-')?;
    let quote = match quote {
        "KRW" => Quote::Krw,
        "BTC" => Quote::Btc,
        "USDT" => Quote::Usdt,
        _ => return None,
    };
    (!base.is_empty()).then_some((base, quote))
}

pub fn parse_upbit_tickers(tickers: Vec<UpbitTicker>, received: DateTime<Utc>) -> Vec<PricePoint> {
    tickers
        .into_iter()
        .filter_map(|ticker| {
            let (base, quote) = parse_market(&ticker.market)?;
            Some(
                PricePoint::new(ExchangeId::Upbit, base, quote, ticker.trade_price, received)
                    .with_change_24h_rate(Some(ticker.signed_change_rate * 100.0))
                    .with_volume_24h_quote(Some(ticker.acc_trade_price_24h))
                    .with_high_low(positive(ticker.high_price), positive(ticker.low_price)),
            )
        })
        .collect()
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct UpbitMarket {
    pub market: String,
}

/// ### Raw Payload Examples
/// See docs: <https://global-docs.upbit.com/reference/tickers>
///```json
/// {
///     "market": "KRW-BTC",
///     "trade_price": 95000000.0,
///     "prev_closing_price": 94000000.0,
///     "signed_change_price": 1000000.0,
///     "signed_change_rate": 0.0106382979,
///     "high_price": 95500000.0,
///     "low_price": 93800000.0,
///     "acc_trade_price_24h": 312345678901.5
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct UpbitTicker {
    pub market: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub trade_price: f64,

    /// Fractional change (eg/ 0.0106 == 1.06%).
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub signed_change_rate: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low_price: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub acc_trade_price_24h: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_parse_market() {
        struct TestCase {
            input: &'static str,
            expected: Option<(&'static str, Quote)>,
        }

        let tests = vec![
            TestCase {
                // TC0: KRW market
                input: "KRW-BTC",
                expected: Some(("BTC", Quote::Krw)),
            },
            TestCase {
                // TC1: BTC market
                input: "BTC-ETH",
                expected: Some(("ETH", Quote::Btc)),
            },
            TestCase {
                // TC2: USDT market
                input: "USDT-XRP",
                expected: Some(("XRP", Quote::Usdt)),
            },
            TestCase {
                // TC3: unsupported quote
                input: "ETH-FOO",
                expected: None,
            },
            TestCase {
                // TC4: malformed code
                input: "KRWBTC",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_market(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_upbit_tickers() {
        let input = r#"[
            {"market":"KRW-BTC","trade_price":95000000.0,"signed_change_rate":0.0106,"high_price":95500000.0,"low_price":93800000.0,"acc_trade_price_24h":312345678901.5},
            {"market":"BTC-ETH","trade_price":"0.0352","signed_change_rate":-0.01,"high_price":0,"low_price":0,"acc_trade_price_24h":12.5},
            {"market":"KRW-BAD","trade_price":"n/a"}
        ]"#;
        let tickers = serde_json::from_str::<Vec<UpbitTicker>>(input).unwrap();
        let actual = parse_upbit_tickers(tickers, time_plus_secs(0));

        assert_eq!(actual.len(), 3);
        assert_eq!(actual[0].key().to_string(), "UPBIT:BTC:KRW");
        assert_eq!(actual[0].price, 95_000_000.0);
        assert!((actual[0].change_24h_rate.unwrap() - 1.06).abs() < 1e-9);
        assert_eq!(actual[0].volume_24h_quote, Some(312_345_678_901.5));

        assert_eq!(actual[1].key().to_string(), "UPBIT:ETH:BTC");
        assert_eq!(actual[1].price, 0.0352);
        assert_eq!(actual[1].high_24h, None);

        // Malformed price survives as an invalid point
        assert!(!actual[2].is_valid());
    }
}
