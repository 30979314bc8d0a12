use self::ticker::BinanceMiniTicker;
use crate::{
    error::DataError,
    exchange::{Connector, ConnectorEvent, FeedId, ParseContext, PingInterval, WsMessage},
    model::{ExchangeId, MarketEvent, Symbol},
};
use std::time::Duration;

/// Public `!miniTicker@arr` ticker types for [`BinanceSpot`] & [`BinanceFutures`].
pub mod ticker;

/// Combined aggTrade & kline stream [`Connector`] used by the signal engine.
pub mod trade;

pub use trade::BinanceTrades;

/// [`BinanceSpot`] server urls in fallback order.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams>
pub const URLS_BINANCE_SPOT: &[&str] = &[
    "wss://stream.binance.com:9443/ws/!miniTicker@arr",
    "wss://data-stream.binance.vision/ws/!miniTicker@arr",
];

/// [`BinanceFutures`] server urls in fallback order.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams>
pub const URLS_BINANCE_FUTURES: &[&str] = &[
    "wss://fstream.binance.com/ws/!miniTicker@arr",
    "wss://fstream.binance.vision/ws/!miniTicker@arr",
];

/// Binance client heartbeat [`PingInterval`] duration.
///
/// Binance servers send their own ping frames, but an idle client ping keeps proxies from
/// culling the connection.
pub const PING_INTERVAL_BINANCE: Duration = Duration::from_secs(30);

/// Quote suffix of every tracked Binance market.
pub const QUOTE_SUFFIX_USDT: &str = "USDT";

pub(crate) fn binance_ping() -> PingInterval {
    PingInterval {
        interval: PING_INTERVAL_BINANCE,
        ping: || WsMessage::Ping(Default::default()),
    }
}

/// Binance spot `!miniTicker@arr` firehose.
///
/// The stream carries every market, so no subscription is sent and tracked symbols are
/// filtered client-side.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BinanceSpot;

/// Binance USD-M futures `!miniTicker@arr` firehose.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BinanceFutures;

impl Connector for BinanceSpot {
    fn feed(&self) -> FeedId {
        FeedId::BinanceSpot
    }

    fn urls(&self) -> &'static [&'static str] {
        URLS_BINANCE_SPOT
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(binance_ping())
    }

    fn subscribe(&self, _: &[Symbol]) -> Vec<WsMessage> {
        vec![]
    }

    fn unsubscribe(&self, _: &[Symbol]) -> Vec<WsMessage> {
        vec![]
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        parse_mini_tickers(ExchangeId::BinanceSpot, ctx, text)
    }
}

impl Connector for BinanceFutures {
    fn feed(&self) -> FeedId {
        FeedId::BinanceFutures
    }

    fn urls(&self) -> &'static [&'static str] {
        URLS_BINANCE_FUTURES
    }

    fn ping(&self) -> Option<PingInterval> {
        Some(binance_ping())
    }

    fn subscribe(&self, _: &[Symbol]) -> Vec<WsMessage> {
        vec![]
    }

    fn unsubscribe(&self, _: &[Symbol]) -> Vec<WsMessage> {
        vec![]
    }

    fn parse(&self, ctx: &ParseContext<'_>, text: &str) -> Result<Vec<ConnectorEvent>, DataError> {
        parse_mini_tickers(ExchangeId::BinanceFutures, ctx, text)
    }
}

fn parse_mini_tickers(
    exchange: ExchangeId,
    ctx: &ParseContext<'_>,
    text: &str,
) -> Result<Vec<ConnectorEvent>, DataError> {
    // Firehose frames are arrays, anything else (eg/ subscription acks) is ignored
    if !text.trim_start().starts_with('[') {
        return Ok(vec![]);
    }

    let tickers = serde_json::from_str::<Vec<BinanceMiniTicker>>(text)
        .map_err(|error| DataError::deserialise(exchange, error))?;

    Ok(tickers
        .into_iter()
        .filter_map(|ticker| ticker.into_price(exchange, ctx))
        .map(|price| ConnectorEvent::Market(MarketEvent::Price(price)))
        .collect())
}

/// Strip the USDT quote suffix from a Binance market symbol (eg/ "BTCUSDT" -> "BTC").
pub(crate) fn strip_usdt(market: &str) -> Option<&str> {
    market
        .strip_suffix(QUOTE_SUFFIX_USDT)
        .filter(|base| !base.is_empty())
}
