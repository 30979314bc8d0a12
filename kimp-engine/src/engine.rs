use crate::{
    config::{EngineConfig, MarketPair},
    error::EngineError,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use kimp_data::{
    connector::EventSink,
    fetcher::rest_client,
    manager::ConnectionManager,
    model::{MarketEvent, Symbol},
};
use kimp_premium::{service::PremiumService, table::PremiumTable};
use kimp_signal::{
    aggregator::TradeAggregator,
    candle::CandleStore,
    detector::{Signal, SignalDetector},
    premium::{PremiumHistory, PremiumShift},
};
use parking_lot::Mutex;
use reqwest::Client;
use std::{future::Future, path::Path, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// The running kimchi-premium engine.
///
/// Streamed trades & candles flow from the [`ConnectionManager`] event sink into the
/// [`TradeAggregator`] and [`CandleStore`]; streamed prices land in the manager's store and
/// are merged by the [`PremiumService`] every polling cycle. Every periodic task observes
/// one shutdown channel.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    client: Client,
    manager: Arc<ConnectionManager>,
    aggregator: Arc<TradeAggregator>,
    candles: Arc<CandleStore>,
    evaluator: Evaluator,
    premium: Arc<PremiumService>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let client = rest_client()?;
        let aggregator = Arc::new(TradeAggregator::new(config.aggregator));
        let candles = Arc::new(CandleStore::new());

        let sink: EventSink = {
            let aggregator = Arc::clone(&aggregator);
            let candles = Arc::clone(&candles);
            Arc::new(move |event| route_event(&aggregator, &candles, event))
        };

        let manager = Arc::new(
            ConnectionManager::with_default_connectors(config.manager).with_event_sink(sink),
        );
        let premium = Arc::new(PremiumService::new(
            config.premium.clone(),
            client.clone(),
            manager.store(),
        ));
        let evaluator = Evaluator {
            aggregator: Arc::clone(&aggregator),
            detector: SignalDetector::new(
                Arc::clone(&aggregator),
                Arc::clone(&candles),
                config.signals,
            ),
            history: Arc::new(PremiumHistory::new(config.premium_shift)),
            premium: Arc::clone(&premium),
            pair: config.pair,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            client,
            manager,
            aggregator,
            candles,
            evaluator,
            premium,
            shutdown,
            tasks: Mutex::new(vec![]),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn aggregator(&self) -> &Arc<TradeAggregator> {
        &self.aggregator
    }

    pub fn candles(&self) -> &Arc<CandleStore> {
        &self.candles
    }

    pub fn premium(&self) -> &Arc<PremiumService> {
        &self.premium
    }

    /// Resolve the symbol universe, start every connector and spawn the polling,
    /// back-fill, rollover, watchdog and universe refresh tasks.
    pub fn start(&self) -> Result<(), EngineError> {
        let universe = self.config.universe()?;
        if !self.manager.start(&universe) {
            return Err(EngineError::AlreadyStarted);
        }
        self.premium.update_symbols(&universe);

        info!(
            symbols = universe.len(),
            feeds = self.manager.feeds().len(),
            "starting Engine"
        );

        let mut tasks = self.tasks.lock();

        tasks.push(tokio::spawn(
            Arc::clone(&self.premium).run(self.shutdown.subscribe()),
        ));

        tasks.push(tokio::spawn(backfill(
            Arc::clone(&self.candles),
            self.client.clone(),
            universe,
            self.shutdown.subscribe(),
        )));

        tasks.push(tokio::spawn({
            let evaluator = self.evaluator.clone();
            let manager = Arc::clone(&self.manager);
            every(
                self.config.rollover_interval,
                self.shutdown.subscribe(),
                move || {
                    evaluator.tick(&manager.symbols(), Utc::now());
                    std::future::ready(())
                },
            )
        }));

        tasks.push(tokio::spawn({
            let manager = Arc::clone(&self.manager);
            let threshold = self.config.stale_threshold;
            every(
                self.config.watchdog_interval,
                self.shutdown.subscribe(),
                move || watchdog(Arc::clone(&manager), threshold),
            )
        }));

        if let Some(path) = self.config.symbols_file.clone() {
            let manager = Arc::clone(&self.manager);
            let premium = Arc::clone(&self.premium);
            tasks.push(tokio::spawn(every(
                self.config.universe_refresh_interval,
                self.shutdown.subscribe(),
                move || {
                    refresh_universe(&path, &manager, &premium);
                    std::future::ready(())
                },
            )));
        }

        Ok(())
    }

    /// Start the engine and run until ctrl-c, then shut down gracefully.
    pub async fn run(self) -> Result<(), EngineError> {
        self.start()?;

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c, shutting down"),
            Err(error) => error!(%error, "failed to listen for ctrl-c, shutting down"),
        }

        self.shutdown().await;
        Ok(())
    }

    /// Signal every task to stop and wait for them to exit, then stop every connector.
    ///
    /// Tasks are joined first so no watchdog restart is still in flight once the
    /// [`ConnectionManager`] stops.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(error) = result {
                warn!(%error, "engine task terminated abnormally");
            }
        }

        self.manager.stop().await;
        info!("Engine stopped");
    }
}

/// Route one streamed event into the store that owns it. Prices are already stored by
/// the [`ConnectionManager`].
pub fn route_event(aggregator: &TradeAggregator, candles: &CandleStore, event: MarketEvent) {
    match event {
        MarketEvent::Trade(trade) => {
            aggregator.record_trade(&trade);
        }
        MarketEvent::Candle(candle) => {
            candles.apply(&candle);
        }
        MarketEvent::Price(_) => {}
    }
}

/// Per-rollover evaluation: close the minute, classify whale & spike signals and update
/// the premium-shift history.
#[derive(Debug, Clone)]
struct Evaluator {
    aggregator: Arc<TradeAggregator>,
    detector: SignalDetector,
    history: Arc<PremiumHistory>,
    premium: Arc<PremiumService>,
    pair: MarketPair,
}

impl Evaluator {
    fn tick(&self, symbols: &[Symbol], now: DateTime<Utc>) {
        let evicted = self.aggregator.rollover(now);

        let signals = self.detector.scan(symbols, now);
        signals.iter().for_each(log_signal);

        let table = self.premium.table_pair(self.pair.domestic, self.pair.foreign);
        let shifts = record_premiums(&self.history, &table, now);
        for shift in &shifts {
            info!(
                symbol = %shift.symbol,
                direction = %shift.direction,
                premium = shift.premium,
                change_pp = ?shift.change_pp,
                "premium shift"
            );
        }

        debug!(
            evicted,
            signals = signals.len(),
            shifts = shifts.len(),
            "evaluated rollover"
        );
    }
}

fn log_signal(signal: &Signal) {
    match signal {
        Signal::Whale(whale) => info!(
            exchange = %whale.exchange,
            symbol = %whale.symbol,
            side = %whale.side,
            notional = whale.notional,
            ratio = whale.ratio,
            side_share = whale.side_share,
            "whale signal"
        ),
        Signal::Spike(spike) => info!(
            symbol = %spike.symbol,
            direction = %spike.direction,
            change_pct = spike.change_pct,
            volume_ratio = spike.volume_ratio,
            "spike signal"
        ),
    }
}

/// Record every priced row of `table` into `history` and return the symbols whose
/// premium shifted.
pub fn record_premiums(
    history: &PremiumHistory,
    table: &PremiumTable,
    now: DateTime<Utc>,
) -> Vec<PremiumShift> {
    table
        .rows
        .iter()
        .filter_map(|row| row.premium_rate.map(|premium| (&row.symbol, premium)))
        .filter_map(|(symbol, premium)| {
            history.record(symbol, premium, now);
            history.shift_condition(symbol, now)
        })
        .collect()
}

async fn backfill(
    candles: Arc<CandleStore>,
    client: Client,
    symbols: Vec<Symbol>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        loaded = candles.backfill(&client, &symbols) => {
            info!(symbols = symbols.len(), loaded, "candle back-fill complete");
        }
        _ = shutdown.changed() => {
            debug!("candle back-fill cancelled");
        }
    }
}

async fn watchdog(manager: Arc<ConnectionManager>, threshold: Duration) {
    let now = Utc::now();
    for feed in manager.stale_feeds(now, threshold) {
        warn!(
            %feed,
            threshold_secs = threshold.as_secs(),
            "feed silent beyond stale threshold, restarting"
        );
        manager.restart(feed).await;
    }

    let stats = manager.stats(now);
    debug!(
        total_ticks = stats.total_ticks,
        stored_prices = stats.stored_prices,
        symbols = stats.symbols,
        "connection stats"
    );
}

fn refresh_universe(path: &Path, manager: &ConnectionManager, premium: &PremiumService) {
    match crate::config::read_symbols_file(path) {
        Ok(symbols) if symbols.is_empty() => {
            warn!(path = %path.display(), "symbols file is empty, keeping current universe");
        }
        Ok(symbols) => {
            debug!(symbols = symbols.len(), "refreshed symbol universe");
            manager.update_symbols(&symbols);
            premium.update_symbols(&symbols);
        }
        Err(error) => warn!(%error, "failed to refresh universe, keeping current"),
    }
}

/// Run `task` every `period`, first after one full period, until `shutdown` flips to
/// `true` or its sender is dropped.
async fn every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => task().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
