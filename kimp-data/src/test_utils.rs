use crate::model::{ExchangeId, PricePoint, Quote, Symbol};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashSet;

pub fn symbols(raw: &[&str]) -> FnvHashSet<Symbol> {
    raw.iter().map(|symbol| Symbol::new(symbol)).collect()
}

pub fn time_plus_secs(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::seconds(secs)
}

pub fn time_plus_millis(millis: i64) -> DateTime<Utc> {
    time_plus_secs(0) + TimeDelta::milliseconds(millis)
}

pub fn price(exchange: ExchangeId, symbol: &str, quote: Quote, value: f64, received_ms: i64) -> PricePoint {
    PricePoint::new(exchange, symbol, quote, value, time_plus_millis(received_ms))
}
