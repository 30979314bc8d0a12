use crate::{
    error::DataError,
    exchange::{
        Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage,
        change_rate_from_open, de_lenient_f64, positive,
    },
    model::{ExchangeId, MarketEvent, PricePoint, Quote, Symbol, normalise_symbol},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// [`Okx`] server base url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-api-resources-and-support>
pub const BASE_URL_OKX: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// [`Okx`] server [`PingInterval`] duration. Connections idle for 30s are closed.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-websocket-connect>
pub const PING_INTERVAL_OKX: Duration = Duration::from_secs(25);

/// Maximum `args` per subscription request.
pub const SUBSCRIBE_BATCH_OKX: usize = 50;

/// Delay between consecutive subscription batches.
pub const SUBSCRIBE_DELAY_OKX: Duration = Duration::from_millis(100);

/// Error code returned when subscribing to an instrument OKX does not list.
pub const ERROR_CODE_UNKNOWN_INSTRUMENT: &str = "60018";

/// [`Okx`] public `tickers` channel.
///
/// See docs: <https://www.okx.com/docs-v5/en/#order-book-trading-market-data-ws-tickers-channel>
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Okx;

impl Okx {
    fn requests(op: &str, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .chunks(SUBSCRIBE_BATCH_OKX)
            .map(|batch| {
                let args = batch
                    .iter()
                    .map(|symbol| json!({ "channel": "tickers", "instId": format!("{symbol}-USDT") }))
                    .collect::<Vec<_>>();
                WsMessage::text(json!({ "op": op, "args": args }).to_string())
            })
            .collect()
    }
}

impl Connector for Okx {
    fn feed(&self) -> FeedId {
        FeedId::Okx
    }

    fn urls(&self) -> &'static [&'static str] {
        &[BASE_URL_OKX]
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_OKX,
            ping: || WsMessage::text("ping"),
        })
    }

    fn subscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("subscribe", symbols)
    }

    fn unsubscribe(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        Self::requests("unsubscribe", symbols)
    }

    fn batch_delay(&self) -> Duration {
        SUBSCRIBE_DELAY_OKX
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        if text == "pong" {
            return Ok(vec![]);
        }

        let message = serde_json::from_str::<OkxMessage>(text)
            .map_err(|error| DataError::deserialise(ExchangeId::Okx, error))?;

        match message {
            OkxMessage::Event { event, code, msg } if event == "error" => {
                if code.as_deref() == Some(ERROR_CODE_UNKNOWN_INSTRUMENT) {
                    if let Some(symbol) = rejected_inst_id(&msg) {
                        return Ok(vec![ConnectorEvent::Rejected { symbol, reason: msg }]);
                    }
                }
                Err(DataError::Rejected {
                    exchange: ExchangeId::Okx,
                    message: msg,
                })
            }
            OkxMessage::Event { .. } => Ok(vec![]),
            OkxMessage::Data { data } => Ok(data
                .into_iter()
                .filter_map(|ticker| ticker.into_price(ctx.received))
                .map(|price| ConnectorEvent::Market(MarketEvent::Price(price)))
                .collect()),
        }
    }
}

/// Extract the base asset from an OKX error message (eg/ "Wrong URL or channel:tickers,
/// instId:FOO-USDT doesn't exist" -> "FOO").
fn rejected_inst_id(msg: &str) -> Option<Symbol> {
    let (_, after) = msg.split_once("instId:")?;
    let (base, _) = after.split_once("-USDT")?;
    let base = base.trim();
    (!base.is_empty() && !base.contains(char::is_whitespace)).then(|| normalise_symbol(base))
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum OkxMessage {
    Data {
        data: Vec<OkxTicker>,
    },
    Event {
        event: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        msg: String,
    },
}

/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#order-book-trading-market-data-ws-tickers-channel>
///```json
/// {
///     "instType": "SPOT",
///     "instId": "BTC-USDT",
///     "last": "9999.99",
///     "open24h": "9000",
///     "high24h": "10000",
///     "low24h": "8888.88",
///     "volCcy24h": "2222",
///     "ts": "1597026383085"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTicker {
    pub inst_id: String,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub last: f64,

    #[serde(rename = "open24h", default, deserialize_with = "de_lenient_f64")]
    pub open_24h: f64,

    #[serde(rename = "high24h", default, deserialize_with = "de_lenient_f64")]
    pub high_24h: f64,

    #[serde(rename = "low24h", default, deserialize_with = "de_lenient_f64")]
    pub low_24h: f64,

    #[serde(rename = "volCcy24h", default, deserialize_with = "de_lenient_f64")]
    pub vol_ccy_24h: f64,
}

impl OkxTicker {
    /// Convert into a USDT-quoted [`PricePoint`] received at `received`.
    pub fn into_price(self, received: DateTime<Utc>) -> Option<PricePoint> {
        let (base, quote) = self.inst_id.split_once('-')?;
        if quote != "USDT" {
            return None;
        }

        Some(
            PricePoint::new(ExchangeId::Okx, base, Quote::Usdt, self.last, received)
                .with_change_24h_rate(change_rate_from_open(self.last, self.open_24h))
                .with_volume_24h_quote(Some(self.vol_ccy_24h))
                .with_high_low(positive(self.high_24h), positive(self.low_24h)),
        )
    }
}
