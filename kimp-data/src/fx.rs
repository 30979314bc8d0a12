use crate::{error::DataError, fetcher::DEFAULT_FETCH_TIMEOUT};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// CoinGecko simple price endpoint used for the USDT/KRW rate.
///
/// See docs: <https://docs.coingecko.com/reference/simple-price>
pub const URL_COINGECKO_SIMPLE_PRICE: &str = "https://api.coingecko.com/api/v3/simple/price";

/// USDT/KRW rate used until the first successful refresh.
pub const DEFAULT_USDT_KRW: f64 = 1450.0;

/// Minimum time between two refresh attempts.
pub const DEFAULT_FX_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Periodically refreshed USDT/KRW exchange rate.
///
/// Reads never block on the network: [`FxRateCache::rate`] always returns the last good
/// value, and a failed refresh keeps it.
#[derive(Debug)]
pub struct FxRateCache {
    state: RwLock<FxState>,
    refresh_interval: TimeDelta,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct FxState {
    rate: f64,
    updated_at: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

impl Default for FxRateCache {
    fn default() -> Self {
        Self::new(DEFAULT_USDT_KRW, DEFAULT_FX_REFRESH_INTERVAL)
    }
}

impl FxRateCache {
    pub fn new(default_rate: f64, refresh_interval: Duration) -> Self {
        Self {
            state: RwLock::new(FxState {
                rate: default_rate,
                updated_at: None,
                last_attempt: None,
            }),
            refresh_interval: TimeDelta::from_std(refresh_interval)
                .unwrap_or(TimeDelta::seconds(300)),
        }
    }

    /// Current USDT/KRW rate.
    pub fn rate(&self) -> f64 {
        self.state.read().rate
    }

    /// Time of the last successful refresh, if any.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().updated_at
    }

    /// Determine if a refresh attempt is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .last_attempt
            .is_none_or(|last| now - last >= self.refresh_interval)
    }

    /// Replace the cached rate if `rate` is a positive finite number.
    pub fn set_rate(&self, rate: f64, now: DateTime<Utc>) -> bool {
        if !(rate.is_finite() && rate > 0.0) {
            return false;
        }

        let mut state = self.state.write();
        state.rate = rate;
        state.updated_at = Some(now);
        true
    }

    /// Refresh the rate from CoinGecko if due, returning the (possibly unchanged) rate.
    pub async fn refresh(&self, client: &Client, now: DateTime<Utc>) -> f64 {
        if !self.is_due(now) {
            return self.rate();
        }
        self.state.write().last_attempt = Some(now);

        match fetch_usdt_krw(client).await {
            Ok(rate) if self.set_rate(rate, now) => {
                info!(usdt_krw = rate, "refreshed FX rate");
            }
            Ok(rate) => {
                warn!(usdt_krw = rate, cached = self.rate(), "ignoring invalid FX rate");
            }
            Err(error) => {
                warn!(%error, cached = self.rate(), "failed to refresh FX rate, keeping cached");
            }
        }

        self.rate()
    }
}

/// Fetch the current USDT/KRW rate from CoinGecko.
pub async fn fetch_usdt_krw(client: &Client) -> Result<f64, DataError> {
    let url = Url::parse_with_params(
        URL_COINGECKO_SIMPLE_PRICE,
        &[("ids", "tether"), ("vs_currencies", "krw")],
    )
    .map_err(|error| DataError::FxRate(error.to_string()))?;

    client
        .get(url)
        .timeout(DEFAULT_FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json::<CoinGeckoSimplePrice>()
        .await?
        .tether
        .and_then(|tether| tether.krw)
        .ok_or_else(|| DataError::FxRate("missing tether.krw".to_string()))
}

/// ### Raw Payload Examples
/// See docs: <https://docs.coingecko.com/reference/simple-price>
///```json
/// { "tether": { "krw": 1385.21 } }
/// ```
#[derive(Clone, Copy, PartialEq, Debug, Deserialize)]
pub struct CoinGeckoSimplePrice {
    pub tether: Option<CoinGeckoQuote>,
}

#[derive(Clone, Copy, PartialEq, Debug, Deserialize)]
pub struct CoinGeckoQuote {
    pub krw: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_fx_cache_defaults_until_first_update() {
        let cache = FxRateCache::default();
        assert_eq!(cache.rate(), DEFAULT_USDT_KRW);
        assert_eq!(cache.updated_at(), None);
        assert!(cache.is_due(time_plus_secs(0)));
    }

    #[test]
    fn test_fx_cache_set_rate() {
        let cache = FxRateCache::default();

        struct TestCase {
            input: f64,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: valid rate replaces the default
                input: 1385.5,
                expected: 1385.5,
            },
            TestCase {
                // TC1: zero keeps the cached rate
                input: 0.0,
                expected: 1385.5,
            },
            TestCase {
                // TC2: NaN keeps the cached rate
                input: f64::NAN,
                expected: 1385.5,
            },
            TestCase {
                // TC3: negative keeps the cached rate
                input: -1.0,
                expected: 1385.5,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            cache.set_rate(test.input, time_plus_secs(index as i64));
            assert_eq!(cache.rate(), test.expected, "TC{} failed", index);
        }
        assert_eq!(cache.updated_at(), Some(time_plus_secs(0)));
    }

    #[test]
    fn test_fx_cache_refresh_interval() {
        let cache = FxRateCache::new(DEFAULT_USDT_KRW, Duration::from_secs(300));
        cache.state.write().last_attempt = Some(time_plus_secs(0));

        assert!(!cache.is_due(time_plus_secs(299)));
        assert!(cache.is_due(time_plus_secs(300)));
    }

    #[test]
    fn test_coingecko_payload() {
        let actual = serde_json::from_str::<CoinGeckoSimplePrice>(r#"{"tether":{"krw":1385.21}}"#)
            .unwrap();
        assert_eq!(actual.tether.and_then(|tether| tether.krw), Some(1385.21));

        let actual = serde_json::from_str::<CoinGeckoSimplePrice>(r#"{}"#).unwrap();
        assert_eq!(actual.tether, None);
    }
}
