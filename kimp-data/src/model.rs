use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, StrExt};
use std::fmt::{Display, Formatter};

/// Upper-case base asset ticker (eg/ "BTC").
pub type Symbol = SmolStr;

/// Normalise a raw symbol into the canonical upper-case, whitespace-free form.
pub fn normalise_symbol(raw: &str) -> Symbol {
    raw.trim().to_uppercase_smolstr()
}

/// Every exchange the engine streams from or polls.
///
/// Serialised in SCREAMING_SNAKE_CASE (eg/ "BINANCE_FUTURES").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeId {
    Upbit,
    Bithumb,
    Coinone,
    #[serde(rename = "BINANCE")]
    BinanceSpot,
    BinanceFutures,
    Okx,
    Bybit,
    Bitget,
    Gate,
    Htx,
    Mexc,
}

impl ExchangeId {
    /// Domestic (KRW-quoted) exchanges in premium priority order.
    pub const DOMESTIC: [ExchangeId; 3] = [ExchangeId::Upbit, ExchangeId::Bithumb, ExchangeId::Coinone];

    /// Foreign exchanges in premium priority order.
    pub const FOREIGN: [ExchangeId; 8] = [
        ExchangeId::BinanceSpot,
        ExchangeId::BinanceFutures,
        ExchangeId::Okx,
        ExchangeId::Bybit,
        ExchangeId::Bitget,
        ExchangeId::Gate,
        ExchangeId::Htx,
        ExchangeId::Mexc,
    ];

    /// Return the &str representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Upbit => "UPBIT",
            ExchangeId::Bithumb => "BITHUMB",
            ExchangeId::Coinone => "COINONE",
            ExchangeId::BinanceSpot => "BINANCE",
            ExchangeId::BinanceFutures => "BINANCE_FUTURES",
            ExchangeId::Okx => "OKX",
            ExchangeId::Bybit => "BYBIT",
            ExchangeId::Bitget => "BITGET",
            ExchangeId::Gate => "GATE",
            ExchangeId::Htx => "HTX",
            ExchangeId::Mexc => "MEXC",
        }
    }

    /// Determine if this is a domestic (Korean, KRW-quoted) exchange.
    pub fn is_domestic(&self) -> bool {
        matches!(
            self,
            ExchangeId::Upbit | ExchangeId::Bithumb | ExchangeId::Coinone
        )
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote asset of a market.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quote {
    #[display("KRW")]
    Krw,
    #[display("USDT")]
    Usdt,
    #[display("BTC")]
    Btc,
}

/// Typed composite key identifying one market on one exchange.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct MarketKey {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub quote: Quote,
}

impl MarketKey {
    pub fn new(exchange: ExchangeId, symbol: &str, quote: Quote) -> Self {
        Self {
            exchange,
            symbol: normalise_symbol(symbol),
            quote,
        }
    }
}

impl Display for MarketKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.quote)
    }
}

/// Latest observed price for a market, optionally carrying 24h statistics.
///
/// Ephemeral: overwritten on every update for the same [`MarketKey`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PricePoint {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub quote: Quote,
    pub price: f64,
    pub time_received: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h_quote: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,
}

impl PricePoint {
    /// Construct a [`PricePoint`] without 24h statistics.
    pub fn new(
        exchange: ExchangeId,
        symbol: &str,
        quote: Quote,
        price: f64,
        time_received: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            symbol: normalise_symbol(symbol),
            quote,
            price,
            time_received,
            change_24h_rate: None,
            volume_24h_quote: None,
            high_24h: None,
            low_24h: None,
        }
    }

    pub fn with_change_24h_rate(mut self, rate: Option<f64>) -> Self {
        self.change_24h_rate = rate;
        self
    }

    pub fn with_volume_24h_quote(mut self, volume: Option<f64>) -> Self {
        self.volume_24h_quote = volume;
        self
    }

    pub fn with_high_low(mut self, high: Option<f64>, low: Option<f64>) -> Self {
        self.high_24h = high;
        self.low_24h = low;
        self
    }

    pub fn key(&self) -> MarketKey {
        MarketKey {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            quote: self.quote,
        }
    }

    /// Milliseconds elapsed between receipt and `now`. Clock skew yields zero.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.time_received).num_milliseconds().max(0)
    }

    /// Determine if the price is a positive finite number.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Aggressor side of a public trade.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

/// Normalised public trade.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PublicTrade {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    pub time_exchange: DateTime<Utc>,
    pub time_received: DateTime<Utc>,
}

impl PublicTrade {
    /// Quote-denominated value of the trade.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Candle interval tracked by the engine.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum Interval {
    #[serde(rename = "1m")]
    #[display("1m")]
    OneMinute,
    #[serde(rename = "1h")]
    #[display("1h")]
    OneHour,
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed: bool,
}

/// Candle update for one market & [`Interval`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CandleEvent {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub interval: Interval,
    pub candle: Candle,
}

/// Normalised event emitted by a streaming connector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum MarketEvent {
    Price(PricePoint),
    Trade(PublicTrade),
    Candle(CandleEvent),
}

impl MarketEvent {
    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketEvent::Price(price) => &price.symbol,
            MarketEvent::Trade(trade) => &trade.symbol,
            MarketEvent::Candle(candle) => &candle.symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_serde_names() {
        struct TestCase {
            input: ExchangeId,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: spot Binance serialises as "BINANCE"
                input: ExchangeId::BinanceSpot,
                expected: "\"BINANCE\"",
            },
            TestCase {
                // TC1: Binance futures
                input: ExchangeId::BinanceFutures,
                expected: "\"BINANCE_FUTURES\"",
            },
            TestCase {
                // TC2: domestic exchange
                input: ExchangeId::Upbit,
                expected: "\"UPBIT\"",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = serde_json::to_string(&test.input).unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(
                test.expected.trim_matches('"'),
                test.input.as_str(),
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_market_key_normalises_symbol() {
        let key = MarketKey::new(ExchangeId::Okx, " btc ", Quote::Usdt);
        assert_eq!(key.symbol, "BTC");
        assert_eq!(key.to_string(), "OKX:BTC:USDT");
    }

    #[test]
    fn test_price_point_age_ms() {
        let received = DateTime::<Utc>::from_timestamp_millis(1_000_000).unwrap();
        let point = PricePoint::new(ExchangeId::Upbit, "btc", Quote::Krw, 1.0, received);

        struct TestCase {
            now_ms: i64,
            expected: i64,
        }

        let tests = vec![
            TestCase {
                // TC0: 500ms later
                now_ms: 1_000_500,
                expected: 500,
            },
            TestCase {
                // TC1: clock skew yields zero
                now_ms: 999_000,
                expected: 0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let now = DateTime::<Utc>::from_timestamp_millis(test.now_ms).unwrap();
            assert_eq!(point.age_ms(now), test.expected, "TC{} failed", index);
        }
    }
}
