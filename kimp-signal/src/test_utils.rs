use chrono::{DateTime, TimeDelta, Utc};
use kimp_data::model::{Candle, ExchangeId, PublicTrade, Side, Symbol};

/// Minute & hour aligned base time used by every test.
pub fn time_plus_secs(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_006_400, 0).unwrap() + TimeDelta::seconds(secs)
}

pub fn trade(symbol: &str, price: f64, quantity: f64, side: Side, secs: i64) -> PublicTrade {
    PublicTrade {
        exchange: ExchangeId::BinanceSpot,
        symbol: Symbol::new(symbol),
        price,
        quantity,
        side,
        time_exchange: time_plus_secs(secs),
        time_received: time_plus_secs(secs),
    }
}

pub fn candle(minute: i64, close: f64, volume: f64) -> Candle {
    Candle {
        open_time: time_plus_secs(minute * 60),
        open: close,
        high: close,
        low: close,
        close,
        volume,
        closed: true,
    }
}

/// `count` flat one-minute candles closing at `close` with `volume`.
pub fn flat_candles(count: usize, close: f64, volume: f64) -> Vec<Candle> {
    (0..count)
        .map(|minute| candle(minute as i64, close, volume))
        .collect()
}
