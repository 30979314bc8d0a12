use crate::model::{MarketKey, PricePoint};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::time::Duration;

/// Streamed prices older than this are treated as absent.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_millis(2000);

/// Canonical store of the latest streamed [`PricePoint`] per [`MarketKey`].
///
/// Single writer (the [`ConnectionManager`](crate::manager::ConnectionManager)), many
/// readers. Every read & write is one short critical section, never held across an
/// `.await`.
#[derive(Debug, Default)]
pub struct StreamingPriceStore {
    prices: RwLock<FnvHashMap<MarketKey, PricePoint>>,
}

impl StreamingPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the price for the point's [`MarketKey`].
    pub fn upsert(&self, point: PricePoint) {
        self.prices.write().insert(point.key(), point);
    }

    pub fn get(&self, key: &MarketKey) -> Option<PricePoint> {
        self.prices.read().get(key).cloned()
    }

    /// Fetch the price only if it was received within `max_age` of `now`.
    pub fn get_fresh(
        &self,
        key: &MarketKey,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<PricePoint> {
        self.prices
            .read()
            .get(key)
            .filter(|point| is_fresh(point, now, max_age))
            .cloned()
    }

    /// Every price received within `max_age` of `now`.
    pub fn fresh_snapshot(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> FnvHashMap<MarketKey, PricePoint> {
        self.prices
            .read()
            .iter()
            .filter(|(_, point)| is_fresh(point, now, max_age))
            .map(|(key, point)| (key.clone(), point.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PricePoint> {
        let mut snapshot = self.prices.read().values().cloned().collect::<Vec<_>>();
        snapshot.sort_by(|a, b| a.key().cmp(&b.key()));
        snapshot
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }

    pub fn clear(&self) {
        self.prices.write().clear();
    }
}

/// Determine if a [`PricePoint`] was received within `max_age` of `now`.
pub fn is_fresh(point: &PricePoint, now: DateTime<Utc>, max_age: Duration) -> bool {
    i64::try_from(max_age.as_millis()).map_or(true, |max_age_ms| point.age_ms(now) <= max_age_ms)
}
