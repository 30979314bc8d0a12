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

//! # Kimp-Engine
//! Wires the kimchi-premium engine together: streaming connectors, the polling premium
//! service, trade aggregation, signal classification and graceful shutdown.
//!
//! ## Overview
//! * [`EngineConfig`](config::EngineConfig): every tunable, read from `KIMP_*` environment
//!   variables.
//! * [`Engine`](engine::Engine): owns the shared stores and spawns one task per
//!   periodic concern (polling, rollover, watchdog, universe refresh).
//! * [`init_logging`](logging::init_logging): `tracing-subscriber` setup.

/// Engine configuration & symbol universe loading.
pub mod config;

/// Startup errors.
pub mod error;

/// Engine wiring & task lifecycle.
pub mod engine;

/// Logging & TLS provider initialisation.
pub mod logging;
