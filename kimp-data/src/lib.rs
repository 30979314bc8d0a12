#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cast_possible_truncation,
    unused_crate_dependencies,
    clippy::unused_self,
    rust_2018_idioms,
    missing_debug_implementations
)]
#![allow(clippy::type_complexity)]

//! # Kimp-Data
//! Resilient market data integration for the kimchi-premium engine. Streams normalised
//! ticker, trade and candle events from foreign exchanges over WebSocket, and polls price
//! & 24h statistics snapshots from both domestic (KRW) and foreign exchanges over REST.
//!
//! ## Overview
//! * [`Connector`](exchange::Connector): per-exchange protocol adapter (urls, subscribe
//!   batching, heartbeat strategy, message parsing).
//! * [`ExchangeConnector`](connector::ExchangeConnector): one generic, long-lived
//!   streaming task per [`Connector`](exchange::Connector) with reconnect backoff and a
//!   circuit breaker.
//! * [`ConnectionManager`](manager::ConnectionManager): owns every connector and the
//!   canonical [`StreamingPriceStore`](store::StreamingPriceStore).
//! * [`Fetcher`](fetcher::Fetcher): per-exchange REST snapshot clients.
//! * [`FxRateCache`](fx::FxRateCache): periodically refreshed USDT/KRW rate.

/// All [`Error`](std::error::Error)s generated in Kimp-Data.
pub mod error;

/// Normalised market data model shared by every component ([`MarketKey`](model::MarketKey),
/// [`PricePoint`](model::PricePoint), [`PublicTrade`](model::PublicTrade), etc.).
pub mod model;

/// Per-exchange streaming protocol adapters implementing [`Connector`](exchange::Connector).
pub mod exchange;

/// Generic resilient streaming runtime driven by a [`Connector`](exchange::Connector).
pub mod connector;

/// Stream utilities (eg/ idle read timeout).
pub mod streams;

/// Canonical in-memory store of the latest streamed price per market.
pub mod store;

/// [`ConnectionManager`](manager::ConnectionManager) owning every streaming connector.
pub mod manager;

/// REST snapshot fetchers for price & 24h statistics.
pub mod fetcher;

/// USDT/KRW exchange rate cache.
pub mod fx;

#[cfg(test)]
mod test_utils;
