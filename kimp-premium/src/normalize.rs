use crate::merge::PriceBook;
use kimp_data::model::{ExchangeId, MarketKey, PricePoint, Quote, Symbol};

/// Converts quoted prices into KRW using the merged [`PriceBook`] and the USDT/KRW rate.
///
/// * KRW: used directly.
/// * BTC on a domestic exchange: × that exchange's BTC/KRW price, falling back to the
///   first domestic exchange with one.
/// * BTC on a foreign exchange: × the first foreign BTC/USDT price, then × USDT/KRW.
/// * USDT: × USDT/KRW.
#[derive(Debug, Clone, Copy)]
pub struct KrwNormalizer<'a> {
    book: &'a PriceBook,
    usdt_krw: f64,
}

impl<'a> KrwNormalizer<'a> {
    pub fn new(book: &'a PriceBook, usdt_krw: f64) -> Self {
        Self { book, usdt_krw }
    }

    pub fn usdt_krw(&self) -> f64 {
        self.usdt_krw
    }

    /// KRW value of one unit of `quote` on `exchange`.
    pub fn quote_rate(&self, exchange: ExchangeId, quote: Quote) -> Option<f64> {
        let rate = match quote {
            Quote::Krw => 1.0,
            Quote::Usdt => self.usdt_krw,
            Quote::Btc if exchange.is_domestic() => self.btc_krw(exchange)?,
            Quote::Btc => self.btc_usdt()? * self.usdt_krw,
        };

        positive_finite(rate)
    }

    /// KRW price of `point`, if it and every cross rate it needs are valid.
    pub fn to_krw(&self, point: &PricePoint) -> Option<f64> {
        if !point.is_valid() {
            return None;
        }

        positive_finite(point.price * self.quote_rate(point.exchange, point.quote)?)
    }

    /// Convert any quote denominated amount (eg/ a 24h volume) into KRW.
    pub fn amount_to_krw(&self, exchange: ExchangeId, quote: Quote, amount: Option<f64>) -> Option<f64> {
        let amount = amount.filter(|amount| amount.is_finite() && *amount >= 0.0)?;
        Some(amount * self.quote_rate(exchange, quote)?)
    }

    fn btc_krw(&self, exchange: ExchangeId) -> Option<f64> {
        std::iter::once(exchange)
            .chain(ExchangeId::DOMESTIC)
            .find_map(|exchange| self.valid_price(exchange, Quote::Krw))
    }

    fn btc_usdt(&self) -> Option<f64> {
        ExchangeId::FOREIGN
            .into_iter()
            .find_map(|exchange| self.valid_price(exchange, Quote::Usdt))
    }

    fn valid_price(&self, exchange: ExchangeId, quote: Quote) -> Option<f64> {
        self.book
            .get(&MarketKey {
                exchange,
                symbol: Symbol::new_inline("BTC"),
                quote,
            })
            .filter(|point| point.is_valid())
            .map(|point| point.price)
    }
}

fn positive_finite(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}
