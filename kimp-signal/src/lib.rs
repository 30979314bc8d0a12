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

//! # Kimp-Signal
//! Trade flow aggregation and anomaly classification for the kimchi-premium engine.
//!
//! Every component is an in-memory store with exactly one writer subsystem, and every
//! classifier is a pure function returning a value (signals are never sent anywhere).
//!
//! ## Overview
//! * [`TradeAggregator`](aggregator::TradeAggregator): per-minute buy / sell notional
//!   buckets and a rolling [`BaselineVolume`](aggregator::BaselineVolume) per market.
//! * [`CandleStore`](candle::CandleStore): fixed-length 1m & 1h candle rings, back-filled
//!   from Binance klines at startup.
//! * [`SignalDetector`](detector::SignalDetector): whale & spike classifiers over the two
//!   stores, whale taking precedence.
//! * [`PremiumHistory`](premium::PremiumHistory): short premium history & the
//!   premium-shift classifier.

/// Per-minute trade buckets and rolling baseline volume.
pub mod aggregator;

/// Fixed-length candle ring buffers and Binance kline back-fill.
pub mod candle;

/// Whale & spike classifiers.
pub mod detector;

/// Premium history and premium-shift classifier.
pub mod premium;

#[cfg(test)]
mod test_utils;
