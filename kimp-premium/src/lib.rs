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

//! # Kimp-Premium
//! Computes the kimchi premium: the relative difference between the KRW price of an asset
//! on a domestic (Korean) exchange and its KRW-converted price on a foreign exchange.
//!
//! ## Overview
//! * [`merge_quotes`](merge::merge_quotes): combine the polled snapshot with fresh
//!   streamed prices.
//! * [`KrwNormalizer`](normalize::KrwNormalizer): convert KRW, BTC & USDT quoted prices
//!   into KRW.
//! * [`PremiumComputer`](table::PremiumComputer): build the sorted
//!   [`PremiumTable`](table::PremiumTable), or a filtered view for one market pair.
//! * [`CycleGuard`](guard::CycleGuard): pre-publish validation of a polling cycle.
//! * [`TableWriter`](writer::TableWriter): atomic JSON output.
//! * [`PremiumService`](service::PremiumService): the periodic polling loop tying it all
//!   together.

/// All [`Error`](std::error::Error)s generated in Kimp-Premium.
pub mod error;

/// Merge rule between polled and streamed prices.
pub mod merge;

/// KRW normalisation of quoted prices.
pub mod normalize;

/// Premium rows, table and computer.
pub mod table;

/// Pre-publish validation of a polling cycle.
pub mod guard;

/// Atomic JSON output files.
pub mod writer;

/// Periodic polling service.
pub mod service;

#[cfg(test)]
mod test_utils;

