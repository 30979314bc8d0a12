use chrono::{DateTime, Utc};
use kimp_data::{
    model::{MarketKey, PricePoint},
    store::StreamingPriceStore,
};
use std::{collections::BTreeMap, time::Duration};

/// Latest [`PricePoint`] per [`MarketKey`], ordered by key.
pub type PriceBook = BTreeMap<MarketKey, PricePoint>;

/// Merge the polled snapshot with the [`StreamingPriceStore`].
///
/// A streamed price received within `freshness` of `now` overrides the polled price for
/// the same [`MarketKey`]; 24h statistics the stream does not carry are kept from the
/// polled point. Stale streamed prices are ignored.
pub fn merge_quotes(
    polled: &PriceBook,
    store: &StreamingPriceStore,
    now: DateTime<Utc>,
    freshness: Duration,
) -> PriceBook {
    let mut merged = polled.clone();

    for (key, streamed) in store.fresh_snapshot(now, freshness) {
        let point = match polled.get(&key) {
            Some(polled) => override_price(polled, streamed),
            None => streamed,
        };
        merged.insert(key, point);
    }

    merged
}

fn override_price(polled: &PricePoint, streamed: PricePoint) -> PricePoint {
    PricePoint {
        change_24h_rate: streamed.change_24h_rate.or(polled.change_24h_rate),
        volume_24h_quote: streamed.volume_24h_quote.or(polled.volume_24h_quote),
        high_24h: streamed.high_24h.or(polled.high_24h),
        low_24h: streamed.low_24h.or(polled.low_24h),
        ..streamed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{book, price, time_plus_millis};
    use kimp_data::{
        model::{ExchangeId, Quote},
        store::DEFAULT_FRESHNESS,
    };

    #[test]
    fn test_merge_quotes_freshness() {
        let polled = book([price(ExchangeId::BinanceSpot, "BTC", Quote::Usdt, 66_000.0)
            .with_volume_24h_quote(Some(1_000_000.0))]);
        let key = MarketKey::new(ExchangeId::BinanceSpot, "BTC", Quote::Usdt);

        struct TestCase {
            streamed_ms: i64,
            now_ms: i64,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: streamed price aged 500ms overrides polled
                streamed_ms: 1_000,
                now_ms: 1_500,
                expected: 66_100.0,
            },
            TestCase {
                // TC1: streamed price aged 3000ms is ignored
                streamed_ms: 1_000,
                now_ms: 4_000,
                expected: 66_000.0,
            },
            TestCase {
                // TC2: streamed price aged exactly 2000ms is still fresh
                streamed_ms: 1_000,
                now_ms: 3_000,
                expected: 66_100.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let store = StreamingPriceStore::new();
            store.upsert(PricePoint::new(
                ExchangeId::BinanceSpot,
                "BTC",
                Quote::Usdt,
                66_100.0,
                time_plus_millis(test.streamed_ms),
            ));

            let merged = merge_quotes(&polled, &store, time_plus_millis(test.now_ms), DEFAULT_FRESHNESS);
            let actual = merged.get(&key).unwrap();
            assert_eq!(actual.price, test.expected, "TC{} failed", index);
            assert_eq!(actual.volume_24h_quote, Some(1_000_000.0), "TC{} failed", index);
        }
    }

    #[test]
    fn test_merge_quotes_adds_streamed_only_markets() {
        let polled = book([price(ExchangeId::Upbit, "BTC", Quote::Krw, 95_000_000.0)]);
        let store = StreamingPriceStore::new();
        store.upsert(PricePoint::new(
            ExchangeId::Okx,
            "ETH",
            Quote::Usdt,
            3_000.0,
            time_plus_millis(0),
        ));

        let merged = merge_quotes(&polled, &store, time_plus_millis(100), DEFAULT_FRESHNESS);

        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged
                .get(&MarketKey::new(ExchangeId::Okx, "ETH", Quote::Usdt))
                .map(|point| point.price),
            Some(3_000.0)
        );
        // The polled book is left untouched
        assert_eq!(polled.len(), 1);
    }
}
