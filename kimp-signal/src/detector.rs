use crate::{
    aggregator::{BaselineVolume, TradeAggregator, TradeBucket, env_or},
    candle::CandleStore,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use kimp_data::model::{Candle, ExchangeId, Interval, Side, Symbol};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Whale classifier thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct WhaleThresholds {
    /// Minimum notional traded in the last closed minute.
    pub min_notional: f64,
    /// Minimum ratio of the last closed minute to the [`BaselineVolume`].
    pub min_ratio: f64,
    /// Minimum [`BaselineVolume`] before the market is considered warmed up.
    pub min_baseline: f64,
    /// Minimum share of notional one side must hold to set the direction.
    pub side_share: f64,
}

impl Default for WhaleThresholds {
    fn default() -> Self {
        Self {
            min_notional: 10_000.0,
            min_ratio: 4.5,
            min_baseline: 100.0,
            side_share: 0.6,
        }
    }
}

/// Spike classifier thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpikeThresholds {
    /// Minimum number of one-minute candles required.
    pub min_candles: usize,
    /// Number of candles preceding the latest averaged into the volume baseline.
    pub lookback: usize,
    /// Minimum absolute one-minute close-to-close change, in percent.
    pub min_change_pct: f64,
    /// Minimum ratio of the latest candle volume to the trailing average.
    pub min_volume_ratio: f64,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self {
            min_candles: 21,
            lookback: 20,
            min_change_pct: 2.0,
            min_volume_ratio: 3.0,
        }
    }
}

/// Every classifier threshold, overridable from the environment.
#[derive(Debug, Copy, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SignalThresholds {
    pub whale: WhaleThresholds,
    pub spike: SpikeThresholds,
}

impl SignalThresholds {
    pub fn from_env() -> Self {
        let whale = WhaleThresholds::default();
        let spike = SpikeThresholds::default();

        Self {
            whale: WhaleThresholds {
                min_notional: env_or("KIMP_WHALE_MIN_NOTIONAL", whale.min_notional),
                min_ratio: env_or("KIMP_WHALE_MIN_RATIO", whale.min_ratio),
                min_baseline: env_or("KIMP_WHALE_MIN_BASELINE", whale.min_baseline),
                side_share: env_or("KIMP_WHALE_SIDE_SHARE", whale.side_share),
            },
            spike: SpikeThresholds {
                min_candles: env_or("KIMP_SPIKE_MIN_CANDLES", spike.min_candles),
                lookback: env_or("KIMP_SPIKE_LOOKBACK", spike.lookback),
                min_change_pct: env_or("KIMP_SPIKE_MIN_CHANGE_PCT", spike.min_change_pct),
                min_volume_ratio: env_or("KIMP_SPIKE_MIN_VOLUME_RATIO", spike.min_volume_ratio),
            },
        }
    }

    pub fn with_whale(mut self, whale: WhaleThresholds) -> Self {
        self.whale = whale;
        self
    }

    pub fn with_spike(mut self, spike: SpikeThresholds) -> Self {
        self.spike = spike;
        self
    }
}

/// Abnormally large one-minute notional dominated by one side.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WhaleSignal {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub window_start: DateTime<Utc>,
    pub notional: f64,
    pub side_share: f64,
    pub baseline: f64,
    pub baseline_buckets: usize,
    pub ratio: f64,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[display("up")]
    Up,
    #[display("down")]
    Down,
}

impl Direction {
    /// Direction of a signed change, `None` if it is zero or not finite.
    pub fn of(change: f64) -> Option<Self> {
        if !change.is_finite() || change == 0.0 {
            None
        } else if change > 0.0 {
            Some(Direction::Up)
        } else {
            Some(Direction::Down)
        }
    }
}

/// Sharp one-minute price move on elevated volume.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpikeSignal {
    pub symbol: Symbol,
    pub direction: Direction,
    pub open_time: DateTime<Utc>,
    pub price: f64,
    pub change_pct: f64,
    pub volume: f64,
    pub average_volume: f64,
    pub volume_ratio: f64,
    pub lookback: usize,
}

/// Any signal produced by [`SignalDetector::scan`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Signal {
    Whale(WhaleSignal),
    Spike(SpikeSignal),
}

impl Signal {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Signal::Whale(whale) => &whale.symbol,
            Signal::Spike(spike) => &spike.symbol,
        }
    }
}

/// Classify the last closed [`TradeBucket`] against its [`BaselineVolume`].
///
/// Every condition must hold: notional, ratio to baseline, warmed up baseline, and one
/// side holding at least `side_share` of the notional. A missing baseline means the
/// market is not warmed up.
pub fn classify_whale(
    bucket: &TradeBucket,
    baseline: Option<&BaselineVolume>,
    thresholds: &WhaleThresholds,
) -> Option<WhaleSignal> {
    let baseline = baseline?;
    if !(baseline.average_notional >= thresholds.min_baseline) {
        return None;
    }

    let notional = bucket.total_notional();
    if !(notional >= thresholds.min_notional) {
        return None;
    }

    let ratio = notional / baseline.average_notional;
    if !(ratio >= thresholds.min_ratio) {
        return None;
    }

    let buy_share = bucket.buy_notional / notional;
    let sell_share = bucket.sell_notional / notional;
    let (side, side_share) = if buy_share >= thresholds.side_share {
        (Side::Buy, buy_share)
    } else if sell_share >= thresholds.side_share {
        (Side::Sell, sell_share)
    } else {
        return None;
    };

    Some(WhaleSignal {
        exchange: bucket.exchange,
        symbol: bucket.symbol.clone(),
        side,
        window_start: bucket.window_start,
        notional,
        side_share,
        baseline: baseline.average_notional,
        baseline_buckets: baseline.buckets,
        ratio,
    })
}

/// Classify the latest one-minute candle against the one before it and the trailing
/// `lookback` average volume.
///
/// `candles` must be ordered oldest first.
pub fn classify_spike(candles: &[Candle], thresholds: &SpikeThresholds) -> Option<SpikeSignal> {
    let lookback = thresholds.lookback.max(1);
    if candles.len() < thresholds.min_candles.max(lookback + 1) {
        return None;
    }

    let (latest, history) = candles.split_last()?;
    let previous = history.last()?;
    if !(previous.close > 0.0) {
        return None;
    }

    let trailing = &history[history.len() - lookback..];
    let average_volume = trailing.iter().map(|candle| candle.volume).sum::<f64>() / lookback as f64;
    if !(average_volume > 0.0) {
        return None;
    }

    let change_pct = (latest.close - previous.close) / previous.close * 100.0;
    let volume_ratio = latest.volume / average_volume;

    if change_pct.abs() >= thresholds.min_change_pct && volume_ratio >= thresholds.min_volume_ratio {
        Some(SpikeSignal {
            symbol: Symbol::default(),
            direction: Direction::of(change_pct)?,
            open_time: latest.open_time,
            price: latest.close,
            change_pct,
            volume: latest.volume,
            average_volume,
            volume_ratio,
            lookback,
        })
    } else {
        None
    }
}

/// Evaluates the whale & spike classifiers over the shared [`TradeAggregator`] and
/// [`CandleStore`].
#[derive(Debug, Clone)]
pub struct SignalDetector {
    aggregator: Arc<TradeAggregator>,
    candles: Arc<CandleStore>,
    thresholds: SignalThresholds,
    exchange: ExchangeId,
}

impl SignalDetector {
    pub fn new(
        aggregator: Arc<TradeAggregator>,
        candles: Arc<CandleStore>,
        thresholds: SignalThresholds,
    ) -> Self {
        Self {
            aggregator,
            candles,
            thresholds,
            exchange: ExchangeId::BinanceSpot,
        }
    }

    /// Set the exchange whose trade buckets feed the whale classifier.
    pub fn with_exchange(mut self, exchange: ExchangeId) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    pub fn whale_condition(&self, symbol: &Symbol, now: DateTime<Utc>) -> Option<WhaleSignal> {
        let bucket = self
            .aggregator
            .last_closed_bucket(self.exchange, symbol, now)?;
        let baseline = self.aggregator.baseline(self.exchange, symbol);

        classify_whale(&bucket, baseline.as_ref(), &self.thresholds.whale)
    }

    pub fn spike_condition(&self, symbol: &Symbol) -> Option<SpikeSignal> {
        let candles = self.candles.candles(symbol, Interval::OneMinute);

        classify_spike(&candles, &self.thresholds.spike).map(|spike| SpikeSignal {
            symbol: symbol.clone(),
            ..spike
        })
    }

    /// Evaluate every symbol, whale first. The spike classifier only runs for a symbol
    /// without a whale signal, so one burst never yields two signals.
    pub fn scan(&self, symbols: &[Symbol], now: DateTime<Utc>) -> Vec<Signal> {
        let signals = symbols
            .iter()
            .filter_map(|symbol| {
                self.whale_condition(symbol, now)
                    .map(Signal::Whale)
                    .or_else(|| self.spike_condition(symbol).map(Signal::Spike))
            })
            .collect::<Vec<_>>();

        debug!(
            symbols = symbols.len(),
            signals = signals.len(),
            "scanned for whale & spike signals"
        );

        signals
    }
}
