use crate::{
    connector::{ConnectorConfig, ConnectorState, EventSink, ExchangeConnector, normalise_universe},
    exchange::{Connector, FeedId, default_connectors},
    model::{ExchangeId, MarketEvent, PricePoint, Symbol, normalise_symbol},
    store::{DEFAULT_FRESHNESS, StreamingPriceStore},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Callback invoked with every price recorded by the [`ConnectionManager`].
pub type PriceCallback = Arc<dyn Fn(&PricePoint) + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub connector: ConnectorConfig,
    /// Streamed prices older than this are treated as absent.
    pub freshness: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            freshness: DEFAULT_FRESHNESS,
        }
    }
}

impl ManagerConfig {
    pub fn with_connector(mut self, connector: ConnectorConfig) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct FeedCounters {
    ticks: u64,
    last_update: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    restart_count: u32,
}

/// Per-feed health snapshot for external reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    pub feed: FeedId,
    pub exchange: ExchangeId,
    pub ticks: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_age_ms: Option<i64>,
    pub restart_count: u32,
    pub available: bool,
    pub state: ConnectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total_ticks: u64,
    pub stored_prices: usize,
    pub symbols: usize,
    pub feeds: Vec<FeedStats>,
}

/// Shared between the manager and every connector sink. Owns the single writer path into
/// the [`StreamingPriceStore`].
#[derive(Debug, Default)]
struct Dispatcher {
    store: Arc<StreamingPriceStore>,
    counters: RwLock<FnvHashMap<FeedId, FeedCounters>>,
}

impl Dispatcher {
    fn tick(&self, feed: FeedId, received: DateTime<Utc>) {
        let mut counters = self.counters.write();
        let counter = counters.entry(feed).or_default();
        counter.ticks += 1;
        counter.last_update = Some(received);
    }

    fn record_update(&self, feed: FeedId, mut price: PricePoint, on_price: Option<&PriceCallback>) {
        price.symbol = normalise_symbol(&price.symbol);
        self.tick(feed, price.time_received);
        if let Some(on_price) = on_price {
            on_price(&price);
        }
        self.store.upsert(price);
    }

    fn dispatch(
        &self,
        feed: FeedId,
        event: MarketEvent,
        on_price: Option<&PriceCallback>,
        on_event: Option<&EventSink>,
    ) {
        match event {
            MarketEvent::Price(price) => self.record_update(feed, price, on_price),
            event => {
                let received = match &event {
                    MarketEvent::Trade(trade) => trade.time_received,
                    _ => Utc::now(),
                };
                self.tick(feed, received);
                if let Some(on_event) = on_event {
                    on_event(event);
                }
            }
        }
    }

    fn mark_started(&self, feed: FeedId, restarted: bool) {
        let mut counters = self.counters.write();
        let counter = counters.entry(feed).or_default();
        counter.started_at = Some(Utc::now());
        if restarted {
            counter.restart_count += 1;
        }
    }
}

/// Owns every [`ExchangeConnector`], the canonical [`StreamingPriceStore`], symbol
/// distribution and aggregate health counters.
///
/// An ordinary value: construct as many as required (eg/ one per test).
pub struct ConnectionManager {
    config: ManagerConfig,
    connectors: Vec<ExchangeConnector>,
    dispatcher: Arc<Dispatcher>,
    symbols: RwLock<Vec<Symbol>>,
    running: Mutex<bool>,
    on_price: Option<PriceCallback>,
    on_event: Option<EventSink>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("connectors", &self.connectors)
            .field("symbols", &self.symbols)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self {
            config,
            connectors: connectors
                .into_iter()
                .map(|connector| ExchangeConnector::new(connector, config.connector))
                .collect(),
            dispatcher: Arc::new(Dispatcher::default()),
            symbols: RwLock::new(vec![]),
            running: Mutex::new(false),
            on_price: None,
            on_event: None,
        }
    }

    /// Construct a [`ConnectionManager`] running every default streaming feed.
    pub fn with_default_connectors(config: ManagerConfig) -> Self {
        Self::new(config, default_connectors())
    }

    /// Invoke `callback` with every recorded price.
    pub fn with_price_callback(mut self, callback: PriceCallback) -> Self {
        self.on_price = Some(callback);
        self
    }

    /// Forward every trade & candle event to `sink`.
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.on_event = Some(sink);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<StreamingPriceStore> {
        Arc::clone(&self.dispatcher.store)
    }

    pub fn feeds(&self) -> Vec<FeedId> {
        self.connectors.iter().map(ExchangeConnector::feed).collect()
    }

    pub fn connector(&self, feed: FeedId) -> Option<&ExchangeConnector> {
        self.connectors
            .iter()
            .find(|connector| connector.feed() == feed)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    fn sink(&self, feed: FeedId) -> EventSink {
        let dispatcher = Arc::clone(&self.dispatcher);
        let on_price = self.on_price.clone();
        let on_event = self.on_event.clone();
        Arc::new(move |event| {
            dispatcher.dispatch(feed, event, on_price.as_ref(), on_event.as_ref())
        })
    }

    /// Start every connector with the provided symbols. Idempotent: returns `false` if
    /// already running.
    pub fn start(&self, symbols: &[Symbol]) -> bool {
        let mut running = self.running.lock();
        if *running {
            debug!("ConnectionManager already running, ignoring start");
            return false;
        }

        let symbols = normalise_universe(symbols);
        info!(
            feeds = self.connectors.len(),
            symbols = symbols.len(),
            "starting ConnectionManager"
        );

        for connector in &self.connectors {
            if connector.start(&symbols, self.sink(connector.feed())) {
                self.dispatcher.mark_started(connector.feed(), false);
            }
        }

        *self.symbols.write() = symbols;
        *running = true;
        true
    }

    /// Distribute a new symbol universe to every connector.
    pub fn update_symbols(&self, symbols: &[Symbol]) {
        let symbols = normalise_universe(symbols);
        if *self.symbols.read() == symbols {
            return;
        }

        for connector in &self.connectors {
            connector.update_symbols(&symbols);
        }
        *self.symbols.write() = symbols;
    }

    /// Stop every connector and clear the store.
    ///
    /// The running flag is cleared before any connector is stopped, so a concurrent
    /// [`restart`](Self::restart) either starts its connector before this stops it, or
    /// observes the stopped manager and does nothing.
    pub async fn stop(&self) {
        *self.running.lock() = false;
        join_all(self.connectors.iter().map(ExchangeConnector::stop)).await;
        self.dispatcher.store.clear();
        info!("ConnectionManager stopped");
    }

    /// Stop and restart one feed, incrementing its restart counter.
    ///
    /// Returns false without touching the connector if the manager is not running.
    pub async fn restart(&self, feed: FeedId) -> bool {
        let Some(connector) = self.connector(feed) else {
            warn!(%feed, "cannot restart unknown feed");
            return false;
        };
        if !*self.running.lock() {
            debug!(%feed, "ConnectionManager stopped, ignoring restart");
            return false;
        }

        connector.stop().await;

        let running = self.running.lock();
        if !*running {
            debug!(%feed, "ConnectionManager stopped during restart, leaving connector stopped");
            return false;
        }
        let started = connector.start(&self.symbols(), self.sink(feed));
        self.dispatcher.mark_started(feed, true);
        drop(running);

        info!(%feed, "restarted connector");
        started
    }

    /// Record a price update: normalise symbol case, store it, count it, and forward it to
    /// the optional price callback.
    pub fn record_update(&self, feed: FeedId, price: PricePoint) {
        self.dispatcher
            .record_update(feed, price, self.on_price.as_ref());
    }

    pub fn is_available(&self, feed: FeedId) -> bool {
        self.connector(feed)
            .is_some_and(ExchangeConnector::is_available)
    }

    /// Per-feed tick counts, last-update age, state and restart counts.
    pub fn stats(&self, now: DateTime<Utc>) -> ManagerStats {
        let counters = self.dispatcher.counters.read().clone();

        let feeds = self
            .connectors
            .iter()
            .map(|connector| {
                let feed = connector.feed();
                let counter = counters.get(&feed).cloned().unwrap_or_default();
                let state = connector.state();
                FeedStats {
                    feed,
                    exchange: feed.exchange(),
                    ticks: counter.ticks,
                    last_update: counter.last_update,
                    last_update_age_ms: counter
                        .last_update
                        .map(|last| (now - last).num_milliseconds().max(0)),
                    restart_count: counter.restart_count,
                    available: state.is_available(),
                    state,
                }
            })
            .collect::<Vec<_>>();

        ManagerStats {
            total_ticks: feeds.iter().map(|feed| feed.ticks).sum(),
            stored_prices: self.dispatcher.store.len(),
            symbols: self.symbols.read().len(),
            feeds,
        }
    }

    /// Running feeds with a closed circuit that have produced nothing for longer than
    /// `threshold` (measured from the last update, or from start if none arrived).
    pub fn stale_feeds(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<FeedId> {
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let counters = self.dispatcher.counters.read();

        self.connectors
            .iter()
            .filter(|connector| connector.is_running() && connector.state().circuit.is_closed())
            .filter(|connector| {
                counters
                    .get(&connector.feed())
                    .and_then(|counter| counter.last_update.or(counter.started_at))
                    .is_some_and(|since| (now - since).num_milliseconds() > threshold_ms)
            })
            .map(ExchangeConnector::feed)
            .collect()
    }
}
