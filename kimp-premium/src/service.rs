use crate::{
    guard::{CycleGuard, CycleGuardConfig, GuardVerdict},
    merge::{PriceBook, merge_quotes},
    table::{PremiumComputer, PremiumTable},
    writer::TableWriter,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashSet;
use futures::future::join_all;
use kimp_data::{
    fetcher::{Fetcher, default_fetchers},
    fx::{DEFAULT_FX_REFRESH_INTERVAL, DEFAULT_USDT_KRW, FxRateCache},
    model::{ExchangeId, Quote, Symbol},
    store::{DEFAULT_FRESHNESS, StreamingPriceStore},
};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default interval between two polling cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default output directory for `premium_table.json` & `prices.json`.
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq)]
pub struct PremiumConfig {
    pub poll_interval: Duration,
    /// Streamed prices older than this are ignored by the merge.
    pub freshness: Duration,
    pub data_dir: PathBuf,
    pub default_usdt_krw: f64,
    pub fx_refresh_interval: Duration,
    pub guard: CycleGuardConfig,
}

impl Default for PremiumConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            freshness: DEFAULT_FRESHNESS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            default_usdt_krw: DEFAULT_USDT_KRW,
            fx_refresh_interval: DEFAULT_FX_REFRESH_INTERVAL,
            guard: CycleGuardConfig::default(),
        }
    }
}

impl PremiumConfig {
    /// Read overrides from `KIMP_POLL_INTERVAL_MS`, `KIMP_FRESHNESS_MS`, `KIMP_DATA_DIR`,
    /// `KIMP_DEFAULT_USDT_KRW`, `KIMP_FX_REFRESH_SECS`, `KIMP_GUARD_MAX_INVALID` and
    /// `KIMP_GUARD_MAX_DROP_RATIO`.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            poll_interval: env_millis("KIMP_POLL_INTERVAL_MS").unwrap_or(default.poll_interval),
            freshness: env_millis("KIMP_FRESHNESS_MS").unwrap_or(default.freshness),
            data_dir: std::env::var("KIMP_DATA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.data_dir),
            default_usdt_krw: env_or("KIMP_DEFAULT_USDT_KRW", default.default_usdt_krw),
            fx_refresh_interval: std::env::var("KIMP_FX_REFRESH_SECS")
                .ok()
                .and_then(|secs| secs.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.fx_refresh_interval),
            guard: CycleGuardConfig {
                max_invalid_domestic: env_or(
                    "KIMP_GUARD_MAX_INVALID",
                    default.guard.max_invalid_domestic,
                ),
                max_drop_ratio: env_or("KIMP_GUARD_MAX_DROP_RATIO", default.guard.max_drop_ratio),
            },
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_guard(mut self, guard: CycleGuardConfig) -> Self {
        self.guard = guard;
        self
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
}

/// Outcome of one [`PremiumService::run_cycle`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum CycleOutcome {
    Published {
        rows: usize,
        priced: usize,
        failed: Vec<ExchangeId>,
    },
    Rejected(GuardVerdict),
}

/// Periodic polling service: fetch every exchange concurrently, merge with the
/// [`StreamingPriceStore`], validate, compute and publish the [`PremiumTable`].
///
/// The polled book persists across cycles: an exchange failing this cycle keeps its
/// prior values until overwritten.
#[derive(Debug)]
pub struct PremiumService {
    config: PremiumConfig,
    client: Client,
    fetchers: Vec<Arc<dyn Fetcher>>,
    store: Arc<StreamingPriceStore>,
    fx: FxRateCache,
    computer: PremiumComputer,
    writer: TableWriter,
    symbols: RwLock<FnvHashSet<Symbol>>,
    polled: Mutex<PriceBook>,
    guard: Mutex<CycleGuard>,
    prices: RwLock<Arc<PriceBook>>,
    table: RwLock<Arc<PremiumTable>>,
}

impl PremiumService {
    /// Construct a [`PremiumService`] polling every default [`Fetcher`].
    pub fn new(config: PremiumConfig, client: Client, store: Arc<StreamingPriceStore>) -> Self {
        Self::with_fetchers(config, client, store, default_fetchers())
    }

    pub fn with_fetchers(
        config: PremiumConfig,
        client: Client,
        store: Arc<StreamingPriceStore>,
        fetchers: Vec<Arc<dyn Fetcher>>,
    ) -> Self {
        Self {
            fx: FxRateCache::new(config.default_usdt_krw, config.fx_refresh_interval),
            writer: TableWriter::new(config.data_dir.clone()),
            guard: Mutex::new(CycleGuard::new(config.guard)),
            computer: PremiumComputer::default(),
            config,
            client,
            fetchers,
            store,
            symbols: RwLock::new(FnvHashSet::default()),
            polled: Mutex::new(PriceBook::new()),
            prices: RwLock::new(Arc::new(PriceBook::new())),
            table: RwLock::new(Arc::new(PremiumTable::default())),
        }
    }

    pub fn config(&self) -> &PremiumConfig {
        &self.config
    }

    pub fn fx(&self) -> &FxRateCache {
        &self.fx
    }

    /// Replace the tracked symbol universe used by the next cycle. An empty universe
    /// polls every listed market.
    ///
    /// Polled prices of symbols leaving a non-empty universe are dropped, and the guard
    /// baseline is reset so the smaller book is not rejected as a count drop.
    pub fn update_symbols(&self, symbols: &[Symbol]) {
        let symbols = symbols.iter().cloned().collect::<FnvHashSet<_>>();
        *self.symbols.write() = symbols.clone();

        if symbols.is_empty() {
            return;
        }

        let pruned = {
            let mut polled = self.polled.lock();
            let before = polled.len();
            polled.retain(|key, _| symbols.contains(&key.symbol));
            before - polled.len()
        };

        if pruned > 0 {
            self.guard.lock().reset_baseline();
            info!(pruned, "dropped polled prices of symbols leaving the universe");
        }
    }

    /// Latest published [`PremiumTable`].
    pub fn table(&self) -> Arc<PremiumTable> {
        Arc::clone(&self.table.read())
    }

    /// Latest published merged [`PriceBook`].
    pub fn prices(&self) -> Arc<PriceBook> {
        Arc::clone(&self.prices.read())
    }

    /// Filtered table for one explicit market pair over the latest published prices.
    pub fn table_pair(
        &self,
        domestic: (ExchangeId, Quote),
        foreign: (ExchangeId, Quote),
    ) -> PremiumTable {
        let table = self.table();
        self.computer
            .compute_pair(&self.prices(), domestic, foreign, table.usdt_krw, table.updated_at)
    }

    /// Run one polling cycle: refresh the FX rate if due, then poll and publish.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let usdt_krw = self.fx.refresh(&self.client, Utc::now()).await;
        self.poll_and_publish(usdt_krw).await
    }

    /// Poll every [`Fetcher`] concurrently and publish the cycle at `usdt_krw`.
    pub(crate) async fn poll_and_publish(&self, usdt_krw: f64) -> CycleOutcome {
        let symbols = self.symbols.read().clone();

        let results = join_all(self.fetchers.iter().map(|fetcher| {
            let symbols = &symbols;
            async move { (fetcher.exchange(), fetcher.fetch(&self.client, symbols).await) }
        }))
        .await;

        let mut failed = vec![];
        let polled = {
            let mut polled = self.polled.lock();
            for (exchange, result) in results {
                match result {
                    Ok(points) => {
                        debug!(%exchange, points = points.len(), "polled exchange");
                        for point in points {
                            polled.insert(point.key(), point);
                        }
                    }
                    Err(error) => {
                        warn!(%exchange, %error, "failed to poll exchange, keeping prior values");
                        failed.push(exchange);
                    }
                }
            }
            polled.clone()
        };

        self.publish(&polled, usdt_krw, Utc::now(), failed)
    }

    /// Merge, validate, compute & write one cycle from an already polled book.
    fn publish(
        &self,
        polled: &PriceBook,
        usdt_krw: f64,
        now: DateTime<Utc>,
        failed: Vec<ExchangeId>,
    ) -> CycleOutcome {
        let merged = merge_quotes(polled, &self.store, now, self.config.freshness);

        let verdict = self.guard.lock().check(&merged);
        if !verdict.is_accepted() {
            return CycleOutcome::Rejected(verdict);
        }

        let table = self.computer.compute(&merged, usdt_krw, now);

        if let Err(error) = self.writer.write_prices(&merged) {
            warn!(%error, "failed to write prices");
        }
        if let Err(error) = self.writer.write_table(&table) {
            warn!(%error, "failed to write premium table");
        }

        let outcome = CycleOutcome::Published {
            rows: table.len(),
            priced: table.priced(),
            failed,
        };

        *self.prices.write() = Arc::new(merged);
        *self.table.write() = Arc::new(table);

        outcome
    }

    /// Run polling cycles every `poll_interval` until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            fetchers = self.fetchers.len(),
            interval_ms = self.config.poll_interval.as_millis(),
            data_dir = %self.config.data_dir.display(),
            "starting PremiumService"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = std::time::Instant::now();
                    match self.run_cycle().await {
                        CycleOutcome::Published { rows, priced, failed } => info!(
                            rows,
                            priced,
                            failed = failed.len(),
                            elapsed_ms = started.elapsed().as_millis(),
                            usdt_krw = self.fx.rate(),
                            "published premium table"
                        ),
                        CycleOutcome::Rejected(verdict) => warn!(
                            ?verdict,
                            "cycle rejected, keeping previous premium table"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("PremiumService stopped");
    }
}
