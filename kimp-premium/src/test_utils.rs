use crate::merge::PriceBook;
use chrono::{DateTime, TimeDelta, Utc};
use kimp_data::model::{ExchangeId, PricePoint, Quote};

pub fn time_plus_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(millis)
}

pub fn price(exchange: ExchangeId, symbol: &str, quote: Quote, value: f64) -> PricePoint {
    PricePoint::new(exchange, symbol, quote, value, time_plus_millis(0))
}

pub fn book(points: impl IntoIterator<Item = PricePoint>) -> PriceBook {
    points.into_iter().map(|point| (point.key(), point)).collect()
}
