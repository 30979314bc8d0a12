use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use kimp_data::model::{ExchangeId, PublicTrade, Side, Symbol};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;

/// Number of completed buckets averaged into a [`BaselineVolume`].
pub const DEFAULT_BASELINE_WINDOW: usize = 20;

/// Minimum number of present buckets before a [`BaselineVolume`] is valid.
pub const DEFAULT_MIN_BASELINE_BUCKETS: usize = 5;

/// Extra minutes of buckets retained beyond the baseline window.
pub const DEFAULT_RETENTION_MARGIN: usize = 5;

/// Interval between two [`TradeAggregator::rollover`] passes.
pub const DEFAULT_ROLLOVER_INTERVAL: Duration = Duration::from_secs(60);

/// [`TradeAggregator`] configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct AggregatorConfig {
    pub baseline_window: usize,
    pub min_baseline_buckets: usize,
    pub retention_margin: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            baseline_window: DEFAULT_BASELINE_WINDOW,
            min_baseline_buckets: DEFAULT_MIN_BASELINE_BUCKETS,
            retention_margin: DEFAULT_RETENTION_MARGIN,
        }
    }
}

impl AggregatorConfig {
    /// Read overrides from `KIMP_BASELINE_WINDOW`, `KIMP_MIN_BASELINE_BUCKETS` and
    /// `KIMP_BUCKET_RETENTION_MARGIN`, falling back to the defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            baseline_window: env_or("KIMP_BASELINE_WINDOW", default.baseline_window),
            min_baseline_buckets: env_or(
                "KIMP_MIN_BASELINE_BUCKETS",
                default.min_baseline_buckets,
            ),
            retention_margin: env_or("KIMP_BUCKET_RETENTION_MARGIN", default.retention_margin),
        }
    }

    pub fn with_baseline_window(mut self, window: usize) -> Self {
        self.baseline_window = window;
        self
    }

    pub fn with_min_baseline_buckets(mut self, min: usize) -> Self {
        self.min_baseline_buckets = min;
        self
    }

    pub fn with_retention_margin(mut self, margin: usize) -> Self {
        self.retention_margin = margin;
        self
    }
}

pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Buy & sell notional traded on one market during one minute.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradeBucket {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub window_start: DateTime<Utc>,
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub trades: u64,
}

impl TradeBucket {
    pub fn new(exchange: ExchangeId, symbol: Symbol, window_start: DateTime<Utc>) -> Self {
        Self {
            exchange,
            symbol,
            window_start,
            buy_notional: 0.0,
            sell_notional: 0.0,
            trades: 0,
        }
    }

    pub fn total_notional(&self) -> f64 {
        self.buy_notional + self.sell_notional
    }

    /// Share of the bucket notional bought by aggressors, in `[0, 1]`.
    pub fn buy_share(&self) -> Option<f64> {
        let total = self.total_notional();
        (total > 0.0).then(|| self.buy_notional / total)
    }

    fn add(&mut self, side: Side, notional: f64) {
        match side {
            Side::Buy => self.buy_notional += notional,
            Side::Sell => self.sell_notional += notional,
        }
        self.trades += 1;
    }
}

/// Mean notional of the completed buckets preceding the last closed minute.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BaselineVolume {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub average_notional: f64,
    pub buckets: usize,
    pub computed_at: DateTime<Utc>,
}

/// Read-only [`TradeAggregator`] counters.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct AggregatorStats {
    pub markets: usize,
    pub buckets: usize,
    pub baselines: usize,
    pub trades_recorded: u64,
    pub trades_rejected: u64,
}

type MarketBuckets = BTreeMap<DateTime<Utc>, TradeBucket>;

#[derive(Debug, Default)]
struct AggregatorState {
    buckets: FnvHashMap<(ExchangeId, Symbol), MarketBuckets>,
    baselines: FnvHashMap<(ExchangeId, Symbol), BaselineVolume>,
    trades_recorded: u64,
    trades_rejected: u64,
}

/// Aggregates [`PublicTrade`]s into one [`TradeBucket`] per (exchange, symbol, minute) and
/// maintains a [`BaselineVolume`] per market.
///
/// Fed by the streaming event sink; [`TradeAggregator::rollover`] is driven by a separate
/// one minute timer. Every mutation happens inside a single lock scope, so readers never
/// observe a partially updated bucket.
#[derive(Debug, Default)]
pub struct TradeAggregator {
    config: AggregatorConfig,
    state: RwLock<AggregatorState>,
}

impl TradeAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AggregatorState::default()),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Accumulate the trade notional into the bucket of the minute it was received in.
    /// Exchange clocks are not trusted, so the local receive time drives bucketing just
    /// like [`rollover`](Self::rollover).
    ///
    /// Returns false if the trade carried a non-positive or non-finite notional.
    pub fn record_trade(&self, trade: &PublicTrade) -> bool {
        let notional = trade.notional();
        let mut state = self.state.write();

        if !(notional.is_finite() && notional > 0.0) {
            state.trades_rejected += 1;
            debug!(
                exchange = %trade.exchange,
                symbol = %trade.symbol,
                price = trade.price,
                quantity = trade.quantity,
                "dropping trade with invalid notional"
            );
            return false;
        }

        let window_start = floor_to_minute(trade.time_received);
        state
            .buckets
            .entry((trade.exchange, trade.symbol.clone()))
            .or_default()
            .entry(window_start)
            .or_insert_with(|| TradeBucket::new(trade.exchange, trade.symbol.clone(), window_start))
            .add(trade.side, notional);
        state.trades_recorded += 1;

        true
    }

    /// Evict buckets older than the baseline window plus margin, then recompute every
    /// market's [`BaselineVolume`] from the buckets preceding the just-closed minute.
    ///
    /// Returns the number of evicted buckets.
    pub fn rollover(&self, now: DateTime<Utc>) -> usize {
        let current = floor_to_minute(now);
        let closed = current - TimeDelta::minutes(1);
        let window = minutes(self.config.baseline_window);
        let horizon = current - minutes(self.config.baseline_window + self.config.retention_margin);

        let mut state = self.state.write();
        let AggregatorState {
            buckets, baselines, ..
        } = &mut *state;

        let mut evicted = 0;
        for (key, market) in buckets.iter_mut() {
            let before = market.len();
            *market = market.split_off(&horizon);
            evicted += before - market.len();

            let (count, sum) = market
                .range(closed - window..closed)
                .fold((0usize, 0.0), |(count, sum), (_, bucket)| {
                    (count + 1, sum + bucket.total_notional())
                });

            if count >= self.config.min_baseline_buckets && count > 0 {
                baselines.insert(
                    key.clone(),
                    BaselineVolume {
                        exchange: key.0,
                        symbol: key.1.clone(),
                        average_notional: sum / count as f64,
                        buckets: count,
                        computed_at: now,
                    },
                );
            } else {
                baselines.remove(key);
            }
        }

        buckets.retain(|_, market| !market.is_empty());
        baselines.retain(|key, _| buckets.contains_key(key));

        debug!(
            evicted,
            markets = buckets.len(),
            baselines = baselines.len(),
            "rolled over trade buckets"
        );

        evicted
    }

    /// Bucket for the minute starting at `window_start`.
    pub fn bucket(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
        window_start: DateTime<Utc>,
    ) -> Option<TradeBucket> {
        self.state
            .read()
            .buckets
            .get(&(exchange, symbol.clone()))
            .and_then(|market| market.get(&floor_to_minute(window_start)))
            .cloned()
    }

    /// Bucket of the last fully elapsed minute before `now`.
    pub fn last_closed_bucket(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> Option<TradeBucket> {
        self.bucket(exchange, symbol, floor_to_minute(now) - TimeDelta::minutes(1))
    }

    /// Latest valid [`BaselineVolume`], if enough buckets were present at the last
    /// rollover.
    pub fn baseline(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<BaselineVolume> {
        self.state
            .read()
            .baselines
            .get(&(exchange, symbol.clone()))
            .cloned()
    }

    pub fn stats(&self) -> AggregatorStats {
        let state = self.state.read();
        AggregatorStats {
            markets: state.buckets.len(),
            buckets: state.buckets.values().map(BTreeMap::len).sum(),
            baselines: state.baselines.len(),
            trades_recorded: state.trades_recorded,
            trades_rejected: state.trades_rejected,
        }
    }
}

/// Floor a timestamp to the start of its UTC minute.
pub fn floor_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    let secs = time.timestamp().div_euclid(60) * 60;
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(time)
}

fn minutes(count: usize) -> TimeDelta {
    TimeDelta::minutes(i64::from(u32::try_from(count).unwrap_or(u32::MAX)))
}
