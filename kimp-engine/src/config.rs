use crate::error::EngineError;
use kimp_data::{
    connector::normalise_universe,
    manager::ManagerConfig,
    model::{ExchangeId, Quote, Symbol},
};
use kimp_premium::service::PremiumConfig;
use kimp_signal::{
    aggregator::AggregatorConfig, detector::SignalThresholds, premium::PremiumShiftConfig,
};
use std::{path::PathBuf, time::Duration};

/// Majors tracked when neither `KIMP_SYMBOLS` nor `KIMP_SYMBOLS_FILE` is set.
pub const DEFAULT_SYMBOLS: [&str; 20] = [
    "BTC", "ETH", "BNB", "SOL", "XRP", "DOGE", "ADA", "AVAX", "SHIB", "DOT", "LINK", "MATIC",
    "LTC", "UNI", "ATOM", "XLM", "NEAR", "APT", "ARB", "OP",
];

pub const DEFAULT_UNIVERSE_REFRESH_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_ROLLOVER_INTERVAL: Duration = Duration::from_secs(60);

/// Market pair whose premium feeds the premium-shift classifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MarketPair {
    pub domestic: (ExchangeId, Quote),
    pub foreign: (ExchangeId, Quote),
}

impl Default for MarketPair {
    fn default() -> Self {
        Self {
            domestic: (ExchangeId::Upbit, Quote::Krw),
            foreign: (ExchangeId::BinanceSpot, Quote::Usdt),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Static universe, used when `symbols_file` is unset.
    pub symbols: Vec<Symbol>,
    /// JSON array of symbols, re-read every `universe_refresh_interval`.
    pub symbols_file: Option<PathBuf>,
    pub universe_refresh_interval: Duration,
    pub watchdog_interval: Duration,
    /// Silence after which a running feed is restarted by the watchdog.
    pub stale_threshold: Duration,
    pub rollover_interval: Duration,
    pub log_json: bool,
    pub pair: MarketPair,
    pub manager: ManagerConfig,
    pub premium: PremiumConfig,
    pub aggregator: AggregatorConfig,
    pub signals: SignalThresholds,
    pub premium_shift: PremiumShiftConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|symbol| Symbol::new(symbol)).collect(),
            symbols_file: None,
            universe_refresh_interval: DEFAULT_UNIVERSE_REFRESH_INTERVAL,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            rollover_interval: DEFAULT_ROLLOVER_INTERVAL,
            log_json: false,
            pair: MarketPair::default(),
            manager: ManagerConfig::default(),
            premium: PremiumConfig::default(),
            aggregator: AggregatorConfig::default(),
            signals: SignalThresholds::default(),
            premium_shift: PremiumShiftConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read every `KIMP_*` override, falling back to defaults for anything missing or
    /// unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();
        let premium = PremiumConfig::from_env();

        Self {
            symbols: std::env::var("KIMP_SYMBOLS")
                .ok()
                .map(|raw| parse_symbols(&raw))
                .filter(|symbols| !symbols.is_empty())
                .unwrap_or(default.symbols),
            symbols_file: std::env::var("KIMP_SYMBOLS_FILE")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            universe_refresh_interval: env_secs("KIMP_UNIVERSE_REFRESH_SECS")
                .unwrap_or(default.universe_refresh_interval),
            watchdog_interval: env_secs("KIMP_WATCHDOG_INTERVAL_SECS")
                .unwrap_or(default.watchdog_interval),
            stale_threshold: env_secs("KIMP_STALE_THRESHOLD_SECS")
                .unwrap_or(default.stale_threshold),
            rollover_interval: env_secs("KIMP_ROLLOVER_INTERVAL_SECS")
                .unwrap_or(default.rollover_interval),
            log_json: std::env::var("KIMP_LOG_JSON")
                .is_ok_and(|value| parse_flag(&value)),
            pair: default.pair,
            manager: default.manager.with_freshness(premium.freshness),
            premium,
            aggregator: AggregatorConfig::from_env(),
            signals: SignalThresholds::from_env(),
            premium_shift: PremiumShiftConfig::from_env(),
        }
    }

    pub fn with_symbols(mut self, symbols: &[Symbol]) -> Self {
        self.symbols = normalise_universe(symbols);
        self
    }

    pub fn with_symbols_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.symbols_file = Some(path.into());
        self
    }

    /// Current symbol universe: the symbols file when configured, otherwise the static
    /// list.
    pub fn universe(&self) -> Result<Vec<Symbol>, EngineError> {
        let symbols = match &self.symbols_file {
            Some(path) => read_symbols_file(path)?,
            None => normalise_universe(&self.symbols),
        };

        if symbols.is_empty() {
            return Err(EngineError::EmptyUniverse);
        }
        Ok(symbols)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a comma or whitespace separated symbol list (eg/ "btc, eth SOL").
pub fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let symbols = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(Symbol::new)
        .collect::<Vec<_>>();

    normalise_universe(&symbols)
}

/// Read a JSON array of symbols (eg/ `["BTC", "eth"]`).
pub fn read_symbols_file(path: &std::path::Path) -> Result<Vec<Symbol>, EngineError> {
    let body =
        std::fs::read_to_string(path).map_err(|error| EngineError::symbols_file(path, error))?;
    let symbols = serde_json::from_str::<Vec<Symbol>>(&body)
        .map_err(|error| EngineError::symbols_file(path, error))?;

    Ok(normalise_universe(&symbols))
}
