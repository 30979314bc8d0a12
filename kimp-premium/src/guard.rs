use crate::merge::PriceBook;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct CycleGuardConfig {
    /// More invalid domestic prices than this rejects the cycle.
    pub max_invalid_domestic: usize,
    /// A relative drop in valid prices larger than this versus the last accepted cycle
    /// rejects the cycle.
    pub max_drop_ratio: f64,
}

impl Default for CycleGuardConfig {
    fn default() -> Self {
        Self {
            max_invalid_domestic: 10,
            max_drop_ratio: 0.2,
        }
    }
}

/// Outcome of [`CycleGuard::check`].
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub enum GuardVerdict {
    Accept { priced: usize },
    TooManyInvalid { invalid: usize },
    CountDropped { previous: usize, current: usize },
}

impl GuardVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GuardVerdict::Accept { .. })
    }
}

/// Pre-publish validation of a polling cycle. A rejected cycle keeps the previous table.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    config: CycleGuardConfig,
    last_accepted: Option<usize>,
}

impl CycleGuard {
    pub fn new(config: CycleGuardConfig) -> Self {
        Self {
            config,
            last_accepted: None,
        }
    }

    /// Number of valid prices in the last accepted cycle.
    pub fn last_accepted(&self) -> Option<usize> {
        self.last_accepted
    }

    /// Forget the last accepted count, so the next cycle is not compared against a
    /// universe that no longer exists.
    pub fn reset_baseline(&mut self) {
        self.last_accepted = None;
    }

    /// Validate the merged book. Only an accepted cycle becomes the reference for the
    /// next count comparison.
    pub fn check(&mut self, book: &PriceBook) -> GuardVerdict {
        let invalid = book
            .values()
            .filter(|point| point.exchange.is_domestic() && !point.is_valid())
            .count();
        if invalid > 0 {
            warn!(invalid, "merged cycle contains invalid domestic prices");
        }
        if invalid > self.config.max_invalid_domestic {
            error!(
                invalid,
                max = self.config.max_invalid_domestic,
                "too many invalid domestic prices, keeping previous table"
            );
            return GuardVerdict::TooManyInvalid { invalid };
        }

        let priced = book.values().filter(|point| point.is_valid()).count();
        if let Some(previous) = self.last_accepted.filter(|previous| *previous > 0) {
            let drop = previous.saturating_sub(priced) as f64 / previous as f64;
            if drop > self.config.max_drop_ratio {
                error!(
                    previous,
                    current = priced,
                    drop_pct = drop * 100.0,
                    "priced entry count dropped, keeping previous table"
                );
                return GuardVerdict::CountDropped {
                    previous,
                    current: priced,
                };
            }
        }

        self.last_accepted = Some(priced);
        GuardVerdict::Accept { priced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{book, price};
    use kimp_data::model::{ExchangeId, PricePoint, Quote};

    fn points(valid: usize, invalid_domestic: usize, invalid_foreign: usize) -> PriceBook {
        let valid = (0..valid).map(|index| {
            price(ExchangeId::Upbit, &format!("V{index}"), Quote::Krw, 1.0)
        });
        let invalid_domestic = (0..invalid_domestic).map(|index| {
            price(ExchangeId::Bithumb, &format!("D{index}"), Quote::Krw, 0.0)
        });
        let invalid_foreign = (0..invalid_foreign).map(|index| {
            price(ExchangeId::Okx, &format!("F{index}"), Quote::Usdt, f64::NAN)
        });

        book(
            valid
                .chain(invalid_domestic)
                .chain(invalid_foreign)
                .collect::<Vec<PricePoint>>(),
        )
    }

    #[test]
    fn test_cycle_guard() {
        let mut guard = CycleGuard::default();

        struct TestCase {
            input: PriceBook,
            expected: GuardVerdict,
        }

        let tests = vec![
            TestCase {
                // TC0: first cycle is always the reference
                input: points(100, 0, 0),
                expected: GuardVerdict::Accept { priced: 100 },
            },
            TestCase {
                // TC1: exactly 10 invalid domestic prices is tolerated
                input: points(100, 10, 0),
                expected: GuardVerdict::Accept { priced: 100 },
            },
            TestCase {
                // TC2: 11 invalid domestic prices rejects
                input: points(100, 11, 0),
                expected: GuardVerdict::TooManyInvalid { invalid: 11 },
            },
            TestCase {
                // TC3: invalid foreign prices are not counted
                input: points(100, 0, 50),
                expected: GuardVerdict::Accept { priced: 100 },
            },
            TestCase {
                // TC4: exactly 20% drop is tolerated
                input: points(80, 0, 0),
                expected: GuardVerdict::Accept { priced: 80 },
            },
            TestCase {
                // TC5: more than 20% drop versus the last accepted cycle rejects
                input: points(63, 0, 0),
                expected: GuardVerdict::CountDropped {
                    previous: 80,
                    current: 63,
                },
            },
            TestCase {
                // TC6: rejected cycles do not become the reference
                input: points(64, 0, 0),
                expected: GuardVerdict::Accept { priced: 64 },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = guard.check(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
        assert_eq!(guard.last_accepted(), Some(64));
    }

    #[test]
    fn test_reset_baseline_accepts_smaller_book() {
        let mut guard = CycleGuard::default();
        assert!(guard.check(&points(100, 0, 0)).is_accepted());
        assert!(!guard.check(&points(10, 0, 0)).is_accepted());

        guard.reset_baseline();
        assert_eq!(guard.last_accepted(), None);
        assert_eq!(guard.check(&points(10, 0, 0)), GuardVerdict::Accept { priced: 10 });
    }
}
