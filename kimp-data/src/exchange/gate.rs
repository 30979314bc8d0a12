use crate::{
    error::DataError,
    exchange::{
        Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage, de_lenient_f64,
        positive,
    },
    model::{ExchangeId, MarketEvent, PricePoint, Quote, Symbol, normalise_symbol},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// [`Gate`] spot server base url.
///
/// See docs: <https://www.gate.io/docs/developers/apiv4/ws/en/#server-url>
pub const BASE_URL_GATE: &str = "wss://api.gateio.ws/ws/v4/";

/// [`Gate`] server [`PingInterval`] duration.
///
/// See docs: <https://www.gate.io/docs/developers/apiv4/ws/en/#application-ping-pong>
pub const PING_INTERVAL_GATE: Duration = Duration::from_secs(25);

/// Maximum currency pairs per subscription request.
pub const SUBSCRIBE_BATCH_GATE: usize = 50;

/// [`Gate`] spot `spot.tickers` channel.
///
/// See docs: <https://www.gate.io/docs/developers/apiv4/ws/en/#tickers-channel>
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Gate;

impl Gate {
    fn requests(event: &str, symbols: &[Symbol]) -> Vec<WsMessage> {
        let time = Utc::now().timestamp();
        symbols
            .chunks(SUBSCRIBE_BATCH_GATE)
            .map(|batch| {
                let payload = batch
                    .iter()
                    .map(|symbol| format!("{symbol}_USDT"))
                    .collect::<Vec<_>>();
                WsMessage::text(
                    json!({
                        "time": time,
                        "channel": "spot.tickers",
                        "event": event,
                        "payload": payload,
                    })
                    .to_string(),
                )
            })
            .collect()
    }
}

impl Connector for Gate {
    fn feed(&self) -> FeedId {
        FeedId::Gate
    }

    fn urls(&self) -> &'static [&'static str] {
        &[BASE_URL_GATE]
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_GATE,
            ping: || {
                WsMessage::text(
                    json!({ "time": Utc::now().timestamp(), "channel": "spot.ping" }).to_string(),
                )
            },
        })
    }

    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("subscribe", symbols)
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("unsubscribe", symbols)
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        let message = serde_json::from_str::<GateMessage>(text)
            .map_err(|error| DataError::deserialise(ExchangeId::Gate, error))?;

        if let Some(error) = message.error {
            return match rejected_pair(&error.message) {
                Some(symbol) => Ok(vec![ConnectorEvent::Rejected {
                    symbol,
                    reason: error.message,
                }]),
                None => Err(DataError::Rejected {
                    exchange: ExchangeId::Gate,
                    message: error.message,
                }),
            };
        }

        if message.channel != "spot.tickers" || message.event != "update" {
            return Ok(vec![]);
        }

        let Some(result) = message.result else {
            return Ok(vec![]);
        };

        let ticker = serde_json::from_value::<GateTicker>(result)
            .map_err(|error| DataError::deserialise(ExchangeId::Gate, error))?;

        Ok(ticker
            .into_price(ctx.received)
            .map(|price| ConnectorEvent::Market(MarketEvent::Price(price)))
            .into_iter()
            .collect())
    }
}

/// Extract the base asset from a Gate subscribe error (eg/ "unknown currency pair:
/// FOO_USDT").
fn rejected_pair(message: &str) -> Option<Symbol> {
    let lower = message.to_lowercase();
    if !lower.contains("unknown currency pair") {
        return None;
    }

    message
        .split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .find_map(|token| token.strip_suffix("_USDT"))
        .filter(|base| !base.is_empty())
        .map(normalise_symbol)
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct GateMessage {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub error: Option<GateError>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct GateError {
    pub code: i64,
    pub message: String,
}

/// ### Raw Payload Examples
/// See docs: <https://www.gate.io/docs/developers/apiv4/ws/en/#tickers-channel>
///```json
/// {
///     "currency_pair": "BTC_USDT",
///     "last": "19106.55",
///     "lowest_ask": "19108.71",
///     "highest_bid": "19106.55",
///     "change_percentage": "3.66",
///     "base_volume": "2811.3042155865",
///     "quote_volume": "53441606.52411221454674732293",
///     "high_24h": "19417.74",
///     "low_24h": "18434.21"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct GateTicker {
    pub currency_pair: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub change_percentage: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub quote_volume: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub high_24h: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub low_24h: f64,
}

impl GateTicker {
    /// Convert into a USDT-quoted [`PricePoint`] received at `received`.
    pub fn into_price(self, received: DateTime<Utc>) -> Option<PricePoint> {
        let base = self.currency_pair.strip_suffix("_USDT")?;

        Some(
            PricePoint::new(ExchangeId::Gate, base, Quote::Usdt, self.last, received)
                .with_change_24h_rate(Some(self.change_percentage))
                .with_volume_24h_quote(Some(self.quote_volume))
                .with_high_low(positive(self.high_24h), positive(self.low_24h)),
        )
    }
}
