use crate::{merge::PriceBook, normalize::KrwNormalizer};
use chrono::{DateTime, Utc};
use kimp_data::model::{ExchangeId, MarketKey, PricePoint, Quote, Symbol};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeSet};
use tracing::debug;

/// Quote preference of the domestic side.
pub const DOMESTIC_QUOTES: [Quote; 3] = [Quote::Krw, Quote::Usdt, Quote::Btc];

/// Quote preference of the foreign side.
pub const FOREIGN_QUOTES: [Quote; 2] = [Quote::Usdt, Quote::Btc];

/// Kimchi premium in percent, rounded to two decimals.
///
/// Only computed when both KRW prices are positive finite numbers.
pub fn premium_rate(domestic_krw: f64, foreign_krw: f64) -> Option<f64> {
    let valid = |value: f64| value.is_finite() && value > 0.0;
    if !(valid(domestic_krw) && valid(foreign_krw)) {
        return None;
    }

    let rate = (domestic_krw / foreign_krw - 1.0) * 100.0;
    rate.is_finite().then(|| (rate * 100.0).round() / 100.0)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    /// Both sides priced, premium computed.
    Complete,
    /// Both sides listed but at least one has no valid KRW price.
    Partial,
    /// No market on one of the sides.
    Unlisted,
}

/// One side of a [`PremiumRow`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MarketQuote {
    pub exchange: ExchangeId,
    pub quote: Quote,
    /// Price in the market's own quote.
    pub price: f64,
    pub krw: f64,
}

/// Premium of one symbol between its selected domestic and foreign markets.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PremiumRow {
    pub symbol: Symbol,
    pub status: RowStatus,
    pub domestic: Option<MarketQuote>,
    pub foreign: Option<MarketQuote>,
    pub premium_rate: Option<f64>,
    pub volume_24h_krw: Option<f64>,
    pub volume_24h_foreign_krw: Option<f64>,
    pub change_24h_rate: Option<f64>,
    pub high_24h_krw: Option<f64>,
    pub low_24h_krw: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl PremiumRow {
    pub fn domestic_krw(&self) -> Option<f64> {
        self.domestic.as_ref().map(|side| side.krw)
    }

    pub fn foreign_krw(&self) -> Option<f64> {
        self.foreign.as_ref().map(|side| side.krw)
    }
}

/// Snapshot of every [`PremiumRow`], sorted by premium descending with unpriced rows
/// last.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct PremiumTable {
    pub usdt_krw: f64,
    pub updated_at: DateTime<Utc>,
    pub rows: Vec<PremiumRow>,
}

impl PremiumTable {
    pub fn row(&self, symbol: &str) -> Option<&PremiumRow> {
        self.rows.iter().find(|row| row.symbol == symbol)
    }

    /// Number of [`RowStatus::Complete`] rows.
    pub fn priced(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.status == RowStatus::Complete)
            .count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Selects, per symbol, the first valid domestic & foreign market by priority and builds
/// the [`PremiumTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumComputer {
    domestic: Vec<ExchangeId>,
    foreign: Vec<ExchangeId>,
}

impl Default for PremiumComputer {
    fn default() -> Self {
        Self {
            domestic: ExchangeId::DOMESTIC.to_vec(),
            foreign: ExchangeId::FOREIGN.to_vec(),
        }
    }
}

/// Result of selecting one side of a row.
enum Selection<'a> {
    Priced(MarketQuote, Option<&'a PricePoint>),
    Listed,
    Unlisted,
}

impl PremiumComputer {
    pub fn new(domestic: Vec<ExchangeId>, foreign: Vec<ExchangeId>) -> Self {
        Self { domestic, foreign }
    }

    /// Build the full table across every configured exchange.
    ///
    /// Within a side, quotes are preferred in order (eg/ any KRW market before any USDT
    /// market) and exchanges by priority within a quote.
    pub fn compute(&self, book: &PriceBook, usdt_krw: f64, now: DateTime<Utc>) -> PremiumTable {
        let domestic = candidates(&self.domestic, &DOMESTIC_QUOTES);
        let foreign = candidates(&self.foreign, &FOREIGN_QUOTES);

        build(book, usdt_krw, now, &domestic, &foreign)
    }

    /// Build a filtered table for one explicit (domestic market, foreign market) pair,
    /// eg/ UPBIT/KRW vs BINANCE/USDT.
    pub fn compute_pair(
        &self,
        book: &PriceBook,
        domestic: (ExchangeId, Quote),
        foreign: (ExchangeId, Quote),
        usdt_krw: f64,
        now: DateTime<Utc>,
    ) -> PremiumTable {
        build(book, usdt_krw, now, &[domestic], &[foreign])
    }
}

fn candidates(exchanges: &[ExchangeId], quotes: &[Quote]) -> Vec<(ExchangeId, Quote)> {
    quotes
        .iter()
        .flat_map(|quote| exchanges.iter().map(move |exchange| (*exchange, *quote)))
        .collect()
}

fn build(
    book: &PriceBook,
    usdt_krw: f64,
    now: DateTime<Utc>,
    domestic: &[(ExchangeId, Quote)],
    foreign: &[(ExchangeId, Quote)],
) -> PremiumTable {
    let normalizer = KrwNormalizer::new(book, usdt_krw);

    let symbols = book
        .keys()
        .filter(|key| {
            domestic
                .iter()
                .chain(foreign)
                .any(|(exchange, quote)| key.exchange == *exchange && key.quote == *quote)
        })
        .map(|key| key.symbol.clone())
        .collect::<BTreeSet<_>>();

    let mut rows = symbols
        .into_iter()
        .map(|symbol| {
            let domestic = select(book, &normalizer, &symbol, domestic);
            let foreign = if symbol == "USDT" {
                usdt_foreign(&normalizer, foreign)
            } else {
                select(book, &normalizer, &symbol, foreign)
            };
            row(&normalizer, symbol, domestic, foreign, now)
        })
        .collect::<Vec<_>>();

    rows.sort_by(|a, b| {
        match (a.premium_rate, b.premium_rate) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.symbol.cmp(&b.symbol))
    });

    debug!(
        rows = rows.len(),
        priced = rows.iter().filter(|row| row.premium_rate.is_some()).count(),
        usdt_krw,
        "computed premium table"
    );

    PremiumTable {
        usdt_krw,
        updated_at: now,
        rows,
    }
}

fn select<'a>(
    book: &'a PriceBook,
    normalizer: &KrwNormalizer<'_>,
    symbol: &Symbol,
    candidates: &[(ExchangeId, Quote)],
) -> Selection<'a> {
    let mut listed = false;

    for (exchange, quote) in candidates {
        let key = MarketKey {
            exchange: *exchange,
            symbol: symbol.clone(),
            quote: *quote,
        };
        let Some(point) = book.get(&key) else {
            continue;
        };
        listed = true;

        if let Some(krw) = normalizer.to_krw(point) {
            return Selection::Priced(
                MarketQuote {
                    exchange: *exchange,
                    quote: *quote,
                    price: point.price,
                    krw,
                },
                Some(point),
            );
        }
    }

    if listed {
        Selection::Listed
    } else {
        Selection::Unlisted
    }
}

/// The USDT asset is worth exactly one USDT abroad.
fn usdt_foreign<'a>(
    normalizer: &KrwNormalizer<'_>,
    candidates: &[(ExchangeId, Quote)],
) -> Selection<'a> {
    let Some((exchange, _)) = candidates.iter().find(|(_, quote)| *quote == Quote::Usdt) else {
        return Selection::Unlisted;
    };

    match normalizer.quote_rate(*exchange, Quote::Usdt) {
        Some(krw) => Selection::Priced(
            MarketQuote {
                exchange: *exchange,
                quote: Quote::Usdt,
                price: 1.0,
                krw,
            },
            None,
        ),
        None => Selection::Listed,
    }
}

fn row(
    normalizer: &KrwNormalizer<'_>,
    symbol: Symbol,
    domestic: Selection<'_>,
    foreign: Selection<'_>,
    now: DateTime<Utc>,
) -> PremiumRow {
    let status = match (&domestic, &foreign) {
        (Selection::Priced(..), Selection::Priced(..)) => RowStatus::Complete,
        (Selection::Unlisted, _) | (_, Selection::Unlisted) => RowStatus::Unlisted,
        _ => RowStatus::Partial,
    };

    let (domestic, domestic_point) = match domestic {
        Selection::Priced(quote, point) => (Some(quote), point),
        _ => (None, None),
    };
    let (foreign, foreign_point) = match foreign {
        Selection::Priced(quote, point) => (Some(quote), point),
        _ => (None, None),
    };

    let premium_rate = domestic
        .as_ref()
        .zip(foreign.as_ref())
        .and_then(|(domestic, foreign)| premium_rate(domestic.krw, foreign.krw));

    let to_krw = |point: Option<&PricePoint>, select: fn(&PricePoint) -> Option<f64>| {
        point.and_then(|point| normalizer.amount_to_krw(point.exchange, point.quote, select(point)))
    };

    PremiumRow {
        symbol,
        status,
        volume_24h_krw: to_krw(domestic_point, |point| point.volume_24h_quote),
        volume_24h_foreign_krw: to_krw(foreign_point, |point| point.volume_24h_quote),
        change_24h_rate: domestic_point.and_then(|point| point.change_24h_rate),
        high_24h_krw: to_krw(domestic_point, |point| point.high_24h),
        low_24h_krw: to_krw(domestic_point, |point| point.low_24h),
        domestic,
        foreign,
        premium_rate,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{book, price, time_plus_millis};

    #[test]
    fn test_premium_rate() {
        struct TestCase {
            domestic: f64,
            foreign: f64,
            expected: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: positive premium rounded to 2dp
                domestic: 100_000_000.0,
                foreign: 97_000_000.0,
                expected: Some(3.09),
            },
            TestCase {
                // TC1: discount
                domestic: 97_000_000.0,
                foreign: 100_000_000.0,
                expected: Some(-3.0),
            },
            TestCase {
                // TC2: zero foreign price
                domestic: 100.0,
                foreign: 0.0,
                expected: None,
            },
            TestCase {
                // TC3: non-finite domestic price
                domestic: f64::INFINITY,
                foreign: 100.0,
                expected: None,
            },
            TestCase {
                // TC4: negative domestic price
                domestic: -1.0,
                foreign: 100.0,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = premium_rate(test.domestic, test.foreign);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    fn sample_book() -> PriceBook {
        book([
            // BTC: Upbit KRW vs Binance USDT
            price(ExchangeId::Upbit, "BTC", Quote::Krw, 100_000_000.0)
                .with_volume_24h_quote(Some(5_000_000_000.0))
                .with_change_24h_rate(Some(1.5)),
            price(ExchangeId::Bithumb, "BTC", Quote::Krw, 99_500_000.0),
            price(ExchangeId::BinanceSpot, "BTC", Quote::Usdt, 70_000.0)
                .with_volume_24h_quote(Some(1_000_000.0)),
            // ETH: invalid Upbit price falls back to Bithumb, Binance missing falls back to OKX
            price(ExchangeId::Upbit, "ETH", Quote::Krw, 0.0),
            price(ExchangeId::Bithumb, "ETH", Quote::Krw, 4_900_000.0),
            price(ExchangeId::Okx, "ETH", Quote::Usdt, 3_500.0),
            // XRP: only BTC quoted abroad
            price(ExchangeId::Upbit, "XRP", Quote::Krw, 980.0),
            price(ExchangeId::Gate, "XRP", Quote::Btc, 0.00001),
            // DOGE: domestic only
            price(ExchangeId::Upbit, "DOGE", Quote::Krw, 200.0),
            // SHIB: listed both sides but the foreign price is invalid
            price(ExchangeId::Upbit, "SHIB", Quote::Krw, 0.03),
            price(ExchangeId::Mexc, "SHIB", Quote::Usdt, f64::NAN),
            // USDT: one USDT abroad by definition
            price(ExchangeId::Upbit, "USDT", Quote::Krw, 1_421.0),
        ])
    }

    #[test]
    fn test_compute_selects_by_priority() {
        let table = PremiumComputer::default().compute(&sample_book(), 1_400.0, time_plus_millis(0));

        struct TestCase {
            symbol: &'static str,
            expected_status: RowStatus,
            expected_sides: (Option<ExchangeId>, Option<ExchangeId>),
            expected_premium: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: Upbit KRW vs Binance USDT, 100,000,000 / 98,000,000
                symbol: "BTC",
                expected_status: RowStatus::Complete,
                expected_sides: (Some(ExchangeId::Upbit), Some(ExchangeId::BinanceSpot)),
                expected_premium: Some(2.04),
            },
            TestCase {
                // TC1: falls back to Bithumb and OKX
                symbol: "ETH",
                expected_status: RowStatus::Complete,
                expected_sides: (Some(ExchangeId::Bithumb), Some(ExchangeId::Okx)),
                expected_premium: Some(0.0),
            },
            TestCase {
                // TC2: foreign BTC market via Binance BTC/USDT
                symbol: "XRP",
                expected_status: RowStatus::Complete,
                expected_sides: (Some(ExchangeId::Upbit), Some(ExchangeId::Gate)),
                expected_premium: Some(0.0),
            },
            TestCase {
                // TC3: domestic only
                symbol: "DOGE",
                expected_status: RowStatus::Unlisted,
                expected_sides: (Some(ExchangeId::Upbit), None),
                expected_premium: None,
            },
            TestCase {
                // TC4: listed both sides, foreign price invalid
                symbol: "SHIB",
                expected_status: RowStatus::Partial,
                expected_sides: (Some(ExchangeId::Upbit), None),
                expected_premium: None,
            },
            TestCase {
                // TC5: USDT priced at exactly one USDT abroad
                symbol: "USDT",
                expected_status: RowStatus::Complete,
                expected_sides: (Some(ExchangeId::Upbit), Some(ExchangeId::BinanceSpot)),
                expected_premium: Some(1.5),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let row = table.row(test.symbol).unwrap();
            assert_eq!(row.status, test.expected_status, "TC{} failed", index);
            assert_eq!(
                (
                    row.domestic.as_ref().map(|side| side.exchange),
                    row.foreign.as_ref().map(|side| side.exchange)
                ),
                test.expected_sides,
                "TC{} failed",
                index
            );
            assert_eq!(row.premium_rate, test.expected_premium, "TC{} failed", index);
        }

        assert_eq!(table.len(), 6);
        assert_eq!(table.priced(), 4);
    }

    #[test]
    fn test_compute_sorts_premium_descending_unpriced_last() {
        let table = PremiumComputer::default().compute(&sample_book(), 1_400.0, time_plus_millis(0));

        let actual = table
            .rows
            .iter()
            .map(|row| row.symbol.as_str())
            .collect::<Vec<_>>();

        assert_eq!(actual, vec!["BTC", "USDT", "ETH", "XRP", "DOGE", "SHIB"]);
    }

    #[test]
    fn test_compute_row_statistics_in_krw() {
        let table = PremiumComputer::default().compute(&sample_book(), 1_400.0, time_plus_millis(0));
        let btc = table.row("BTC").unwrap();

        assert_eq!(btc.domestic_krw(), Some(100_000_000.0));
        assert_eq!(btc.foreign_krw(), Some(98_000_000.0));
        assert_eq!(btc.volume_24h_krw, Some(5_000_000_000.0));
        assert_eq!(btc.volume_24h_foreign_krw, Some(1_400_000_000.0));
        assert_eq!(btc.change_24h_rate, Some(1.5));
        assert_eq!(table.usdt_krw, 1_400.0);
    }

    #[test]
    fn test_compute_pair() {
        let table = PremiumComputer::default().compute_pair(
            &sample_book(),
            (ExchangeId::Bithumb, Quote::Krw),
            (ExchangeId::BinanceSpot, Quote::Usdt),
            1_400.0,
            time_plus_millis(0),
        );

        let btc = table.row("BTC").unwrap();
        assert_eq!(btc.domestic_krw(), Some(99_500_000.0));
        assert_eq!(btc.premium_rate, Some(1.53));

        // ETH is listed on Bithumb but not on Binance
        assert_eq!(table.row("ETH").unwrap().status, RowStatus::Unlisted);
        // Markets outside the pair are not considered
        assert!(table.row("DOGE").is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_compute_domestic_quote_order() {
        struct TestCase {
            input: PriceBook,
            expected: (ExchangeId, Quote),
        }

        let foreign = || price(ExchangeId::BinanceSpot, "SOL", Quote::Usdt, 100.0);
        let btc_krw = || price(ExchangeId::Upbit, "BTC", Quote::Krw, 100_000_000.0);

        let tests = vec![
            TestCase {
                // TC0: KRW on any domestic exchange beats USDT on Upbit
                input: book([
                    btc_krw(),
                    foreign(),
                    price(ExchangeId::Upbit, "SOL", Quote::Usdt, 101.0),
                    price(ExchangeId::Bithumb, "SOL", Quote::Krw, 141_000.0),
                ]),
                expected: (ExchangeId::Bithumb, Quote::Krw),
            },
            TestCase {
                // TC1: USDT on any domestic exchange beats BTC on Upbit
                input: book([
                    btc_krw(),
                    foreign(),
                    price(ExchangeId::Upbit, "SOL", Quote::Btc, 0.0014),
                    price(ExchangeId::Bithumb, "SOL", Quote::Usdt, 101.0),
                ]),
                expected: (ExchangeId::Bithumb, Quote::Usdt),
            },
            TestCase {
                // TC2: BTC only
                input: book([
                    btc_krw(),
                    foreign(),
                    price(ExchangeId::Bithumb, "SOL", Quote::Btc, 0.0014),
                ]),
                expected: (ExchangeId::Bithumb, Quote::Btc),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let table = PremiumComputer::default().compute(&test.input, 1_400.0, time_plus_millis(0));
            let domestic = table.row("SOL").and_then(|row| row.domestic.clone()).unwrap();
            assert_eq!((domestic.exchange, domestic.quote), test.expected, "TC{} failed", index);
        }
    }
}
