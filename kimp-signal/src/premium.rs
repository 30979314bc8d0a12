use crate::{aggregator::env_or, detector::Direction};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use kimp_data::model::Symbol;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Premium-shift classifier thresholds & history retention.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PremiumShiftConfig {
    /// Minimum absolute change versus the reference sample, in percentage points.
    pub min_change_pp: f64,
    /// Absolute premium that fires regardless of change, in percent.
    pub min_abs_premium: f64,
    /// Minimum age of the reference sample.
    pub lookback: TimeDelta,
    /// Samples older than this are evicted.
    pub retention: TimeDelta,
}

impl Default for PremiumShiftConfig {
    fn default() -> Self {
        Self {
            min_change_pp: 0.4,
            min_abs_premium: 1.0,
            lookback: TimeDelta::minutes(5),
            retention: TimeDelta::minutes(10),
        }
    }
}

impl PremiumShiftConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            min_change_pp: env_or("KIMP_PREMIUM_SHIFT_MIN_CHANGE_PP", default.min_change_pp),
            min_abs_premium: env_or("KIMP_PREMIUM_SHIFT_MIN_ABS", default.min_abs_premium),
            ..default
        }
    }
}

/// Fired premium-shift classification.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PremiumShift {
    pub symbol: Symbol,
    pub direction: Direction,
    pub premium: f64,
    /// Premium of the most recent sample at least `lookback` old, if any.
    pub reference: Option<f64>,
    pub change_pp: Option<f64>,
    pub time: DateTime<Utc>,
}

/// Short per-symbol history of premium rates.
#[derive(Debug, Default)]
pub struct PremiumHistory {
    config: PremiumShiftConfig,
    samples: RwLock<FnvHashMap<Symbol, VecDeque<(DateTime<Utc>, f64)>>>,
}

impl PremiumHistory {
    pub fn new(config: PremiumShiftConfig) -> Self {
        Self {
            config,
            samples: RwLock::new(FnvHashMap::default()),
        }
    }

    /// Append a premium sample and evict samples older than the retention.
    pub fn record(&self, symbol: &Symbol, premium: f64, time: DateTime<Utc>) {
        if !premium.is_finite() {
            return;
        }

        let mut samples = self.samples.write();
        let history = samples.entry(symbol.clone()).or_default();

        if history.back().is_some_and(|(last, _)| *last > time) {
            return;
        }
        history.push_back((time, premium));

        let cutoff = time - self.config.retention;
        while let Some((front, _)) = history.front() {
            if *front < cutoff {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Classify the latest sample.
    ///
    /// Fires if the premium moved by at least `min_change_pp` versus the most recent
    /// sample at least `lookback` old, or if its absolute value is at least
    /// `min_abs_premium`. The direction follows the change, or the premium sign when
    /// no change is known.
    pub fn shift_condition(&self, symbol: &Symbol, now: DateTime<Utc>) -> Option<PremiumShift> {
        let samples = self.samples.read();
        let history = samples.get(symbol)?;
        let &(time, premium) = history.back()?;

        let reference = history
            .iter()
            .rev()
            .find(|(sampled, _)| now - *sampled >= self.config.lookback)
            .map(|(_, premium)| *premium);
        let change_pp = reference.map(|reference| premium - reference);

        let shifted = change_pp.is_some_and(|change| change.abs() >= self.config.min_change_pp);
        let extreme = premium.abs() >= self.config.min_abs_premium;
        if !(shifted || extreme) {
            return None;
        }

        let direction = change_pp
            .and_then(Direction::of)
            .or_else(|| Direction::of(premium))?;

        Some(PremiumShift {
            symbol: symbol.clone(),
            direction,
            premium,
            reference,
            change_pp,
            time,
        })
    }

    pub fn len(&self, symbol: &Symbol) -> usize {
        self.samples.read().get(symbol).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_shift_condition() {
        struct TestCase {
            // (seconds, premium) samples
            samples: Vec<(i64, f64)>,
            now: i64,
            expected: Option<Direction>,
        }

        let tests = vec![
            TestCase {
                // TC0: no history
                samples: vec![],
                now: 0,
                expected: None,
            },
            TestCase {
                // TC1: +0.5pp versus 5 minutes ago
                samples: vec![(0, 0.2), (300, 0.7)],
                now: 300,
                expected: Some(Direction::Up),
            },
            TestCase {
                // TC2: -0.5pp fires down
                samples: vec![(0, 0.5), (300, 0.0)],
                now: 300,
                expected: Some(Direction::Down),
            },
            TestCase {
                // TC3: small change and small premium
                samples: vec![(0, 0.5), (300, 0.6)],
                now: 300,
                expected: None,
            },
            TestCase {
                // TC4: reference younger than 5 minutes is ignored
                samples: vec![(100, 0.1), (300, 0.9)],
                now: 300,
                expected: None,
            },
            TestCase {
                // TC5: absolute premium fires without history, following its sign
                samples: vec![(300, -1.2)],
                now: 300,
                expected: Some(Direction::Down),
            },
            TestCase {
                // TC6: most recent sample at least 5 minutes old is the reference
                samples: vec![(0, 0.0), (60, 0.6), (360, 0.7)],
                now: 360,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let history = PremiumHistory::default();
            let btc = Symbol::new("BTC");
            for (secs, premium) in &test.samples {
                history.record(&btc, *premium, time_plus_secs(*secs));
            }

            let actual = history
                .shift_condition(&btc, time_plus_secs(test.now))
                .map(|shift| shift.direction);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_record_evicts_beyond_retention() {
        let history = PremiumHistory::default();
        let btc = Symbol::new("BTC");

        for minute in 0..15 {
            history.record(&btc, 0.1, time_plus_secs(minute * 60));
        }
        // Samples at minutes 4..=14 are within 10 minutes of the latest
        assert_eq!(history.len(&btc), 11);

        // Out of order & non-finite samples are ignored
        history.record(&btc, 5.0, time_plus_secs(0));
        history.record(&btc, f64::NAN, time_plus_secs(15 * 60));
        assert_eq!(history.len(&btc), 11);
    }

    #[test]
    fn test_shift_fields() {
        let history = PremiumHistory::default();
        let btc = Symbol::new("BTC");
        history.record(&btc, 3.0, time_plus_secs(0));
        history.record(&btc, 2.5, time_plus_secs(300));

        let actual = history.shift_condition(&btc, time_plus_secs(300)).unwrap();
        assert_eq!(actual.direction, Direction::Down);
        assert_eq!(actual.premium, 2.5);
        assert_eq!(actual.reference, Some(3.0));
        assert_eq!(actual.change_pp, Some(-0.5));
    }
}
