use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures::future::join_all;
use kimp_data::{
    error::DataError,
    model::{Candle, CandleEvent, ExchangeId, Interval, Symbol},
};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

/// Binance spot klines endpoint used to warm up the candle rings.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
pub const URL_BINANCE_KLINES: &str = "https://api.binance.com/api/v3/klines";

/// Number of one-minute candles retained per symbol.
pub const CANDLE_CAPACITY_1M: usize = 100;

/// Number of one-hour candles retained per symbol.
pub const CANDLE_CAPACITY_1H: usize = 250;

const KLINES_TIMEOUT: Duration = Duration::from_secs(10);

/// Ring capacity for an [`Interval`].
pub fn capacity(interval: Interval) -> usize {
    match interval {
        Interval::OneMinute => CANDLE_CAPACITY_1M,
        Interval::OneHour => CANDLE_CAPACITY_1H,
    }
}

/// Fixed-length candle rings per (symbol, [`Interval`]), ordered by open time.
///
/// Live kline events update the in-progress candle in place; a new open time pushes a
/// candle and drops the oldest once the ring is full.
#[derive(Debug, Default)]
pub struct CandleStore {
    rings: RwLock<FnvHashMap<(Symbol, Interval), VecDeque<Candle>>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a live [`CandleEvent`].
    ///
    /// Returns false if the candle is older than the ring and has no slot to update.
    pub fn apply(&self, event: &CandleEvent) -> bool {
        let mut rings = self.rings.write();
        let ring = rings
            .entry((event.symbol.clone(), event.interval))
            .or_insert_with(|| VecDeque::with_capacity(capacity(event.interval)));

        upsert(ring, event.candle.clone(), capacity(event.interval))
    }

    /// Replace the ring for `symbol` & `interval` with `candles`, keeping any live candle
    /// newer than the loaded history.
    pub fn load(&self, symbol: &Symbol, interval: Interval, mut candles: Vec<Candle>) {
        let capacity = capacity(interval);
        candles.sort_by_key(|candle| candle.open_time);
        candles.dedup_by_key(|candle| candle.open_time);

        let mut ring = candles
            .into_iter()
            .rev()
            .take(capacity)
            .collect::<VecDeque<_>>();
        ring.make_contiguous().reverse();

        let mut rings = self.rings.write();
        let entry = rings.entry((symbol.clone(), interval)).or_default();
        let loaded_until = ring.back().map(|candle| candle.open_time);

        for live in entry.drain(..) {
            if loaded_until.is_none_or(|until| live.open_time > until) {
                upsert(&mut ring, live, capacity);
            }
        }

        *entry = ring;
    }

    /// Back-fill every ring for `symbols` from Binance klines, fetching all series
    /// concurrently. Returns the number of series loaded.
    pub async fn backfill(&self, client: &Client, symbols: &[Symbol]) -> usize {
        let requests = symbols.iter().flat_map(|symbol| {
            [Interval::OneMinute, Interval::OneHour].map(|interval| async move {
                let result = fetch_klines(client, symbol, interval, capacity(interval)).await;
                (symbol, interval, result)
            })
        });

        let mut loaded = 0;
        for (symbol, interval, result) in join_all(requests).await {
            match result {
                Ok(candles) => {
                    debug!(%symbol, %interval, candles = candles.len(), "back-filled candles");
                    self.load(symbol, interval, candles);
                    loaded += 1;
                }
                Err(error) => {
                    warn!(%symbol, %interval, %error, "failed to back-fill candles");
                }
            }
        }

        info!(loaded, requested = symbols.len() * 2, "candle back-fill complete");
        loaded
    }

    /// Snapshot of the ring for `symbol` & `interval`, oldest first.
    pub fn candles(&self, symbol: &Symbol, interval: Interval) -> Vec<Candle> {
        self.rings
            .read()
            .get(&(symbol.clone(), interval))
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of candles held for `symbol` & `interval`.
    pub fn len(&self, symbol: &Symbol, interval: Interval) -> usize {
        self.rings
            .read()
            .get(&(symbol.clone(), interval))
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rings.read().values().all(VecDeque::is_empty)
    }
}

fn upsert(ring: &mut VecDeque<Candle>, candle: Candle, capacity: usize) -> bool {
    match ring.back() {
        Some(last) if last.open_time < candle.open_time => {}
        Some(_) => {
            return match ring
                .iter_mut()
                .rev()
                .find(|existing| existing.open_time == candle.open_time)
            {
                Some(existing) => {
                    *existing = candle;
                    true
                }
                None => false,
            };
        }
        None => {}
    }

    ring.push_back(candle);
    while ring.len() > capacity {
        ring.pop_front();
    }
    true
}

/// Fetch the latest `limit` [`Candle`]s of the `symbol`/USDT market from Binance spot.
pub async fn fetch_klines(
    client: &Client,
    symbol: &Symbol,
    interval: Interval,
    limit: usize,
) -> Result<Vec<Candle>, DataError> {
    let market = format!("{symbol}USDT");
    let url = Url::parse_with_params(
        URL_BINANCE_KLINES,
        &[
            ("symbol", market.as_str()),
            ("interval", &interval.to_string()),
            ("limit", &limit.to_string()),
        ],
    )
    .map_err(|error| DataError::Rejected {
        exchange: ExchangeId::BinanceSpot,
        message: format!("invalid klines endpoint: {error}"),
    })?;

    let response = client.get(url).timeout(KLINES_TIMEOUT).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DataError::HttpStatus {
            exchange: ExchangeId::BinanceSpot,
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    let klines = serde_json::from_str::<Vec<BinanceKline>>(&body)
        .map_err(|error| DataError::deserialise(ExchangeId::BinanceSpot, error))?;

    Ok(parse_klines(klines, Utc::now()))
}

/// Convert raw klines into [`Candle`]s, marking those whose close time has passed as
/// closed. Klines with unparsable fields are skipped.
pub fn parse_klines(klines: Vec<BinanceKline>, now: DateTime<Utc>) -> Vec<Candle> {
    let now_ms = now.timestamp_millis();
    klines
        .into_iter()
        .filter_map(|kline| {
            Some(Candle {
                open_time: DateTime::<Utc>::from_timestamp_millis(kline.0)?,
                open: kline.1.parse().ok()?,
                high: kline.2.parse().ok()?,
                low: kline.3.parse().ok()?,
                close: kline.4.parse().ok()?,
                volume: kline.5.parse().ok()?,
                closed: kline.6 < now_ms,
            })
        })
        .collect()
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
///```json
/// [
///     1499040000000,
///     "0.01634790",
///     "0.80000000",
///     "0.01575800",
///     "0.01577100",
///     "148976.11427815",
///     1499644799999,
///     "2434.19055334",
///     308,
///     "1756.87402397",
///     "28.46694368",
///     "0"
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinanceKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub String,
);
