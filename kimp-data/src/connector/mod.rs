use self::circuit::{Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
use crate::{
    error::DataError,
    exchange::{Connector, ConnectorEvent, FeedId, ParseContext, WsMessage},
    model::{MarketEvent, Symbol, normalise_symbol},
    streams::timeout::{DEFAULT_WS_READ_TIMEOUT, TimeoutStream},
};
use chrono::Utc;
use fnv::FnvHashSet;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

/// Reconnect [`CircuitBreaker`] and capped exponential [`Backoff`].
pub mod circuit;

/// Callback receiving every normalised [`MarketEvent`] a connector produces.
pub type EventSink = Arc<dyn Fn(MarketEvent) + Send + Sync>;

/// Quote asset of every streamed market, never subscribed as a base.
const QUOTE_ASSET: &str = "USDT";

/// Maximum time [`ExchangeConnector::stop`] waits for a graceful close before aborting.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable state of one [`ExchangeConnector`]. Persists for the process lifetime and is
/// only mutated by socket events and timers of the connector's own task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorState {
    pub feed: FeedId,
    pub socket: SocketStatus,
    pub consecutive_failures: u32,
    pub circuit: CircuitState,
    pub last_error: Option<String>,
    pub url: Option<String>,
    pub excluded: Vec<Symbol>,
}

impl ConnectorState {
    fn new(feed: FeedId) -> Self {
        Self {
            feed,
            socket: SocketStatus::Disconnected,
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
            last_error: None,
            url: None,
            excluded: vec![],
        }
    }

    /// Connected with a closed circuit.
    pub fn is_available(&self) -> bool {
        self.socket == SocketStatus::Connected && self.circuit.is_closed()
    }
}

/// Configuration shared by every [`ExchangeConnector`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub circuit: CircuitBreakerConfig,
    pub backoff: Backoff,
    /// Silence after which a connection is considered dead.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            circuit: CircuitBreakerConfig::default(),
            backoff: Backoff::default(),
            read_timeout: DEFAULT_WS_READ_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectorConfig {
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectorState>,
    /// Desired symbol universe (normalised, sorted, deduplicated).
    symbols: RwLock<Vec<Symbol>>,
    /// Symbols the exchange rejected. Never subscribed again on this connector.
    excluded: RwLock<FnvHashSet<Symbol>>,
}

impl Shared {
    fn update_state(&self, update: impl FnOnce(&mut ConnectorState)) {
        update(&mut self.state.write());
    }

    fn active_symbols(&self) -> Vec<Symbol> {
        let excluded = self.excluded.read();
        self.symbols
            .read()
            .iter()
            .filter(|symbol| symbol.as_str() != QUOTE_ASSET && !excluded.contains(*symbol))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
enum Command {
    Resubscribe {
        added: Vec<Symbol>,
        removed: Vec<Symbol>,
    },
}

#[derive(Debug)]
struct Running {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    command_tx: mpsc::UnboundedSender<Command>,
}

/// Resilient streaming client for one [`Connector`].
///
/// All timers of a connection (reconnect backoff, circuit cooldown, heartbeat, idle read
/// timeout) live inside a single spawned task, so [`ExchangeConnector::stop`] cancels all
/// of them at once.
#[derive(Debug)]
pub struct ExchangeConnector {
    connector: Arc<dyn Connector>,
    config: ConnectorConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl ExchangeConnector {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectorConfig) -> Self {
        let feed = connector.feed();
        Self {
            connector,
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectorState::new(feed)),
                symbols: RwLock::new(vec![]),
                excluded: RwLock::new(FnvHashSet::default()),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn feed(&self) -> FeedId {
        self.connector.feed()
    }

    /// Start streaming the provided symbols, forwarding every event to `sink`.
    ///
    /// Idempotent: returns `false` without side effects if the connector is already
    /// running. Must be called from within a tokio runtime.
    pub fn start(&self, symbols: &[Symbol], sink: EventSink) -> bool {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            debug!(feed = %self.feed(), "connector already running, ignoring start");
            return false;
        }

        *self.shared.symbols.write() = normalise_universe(symbols);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task = ConnectorTask {
            connector: Arc::clone(&self.connector),
            config: self.config,
            shared: Arc::clone(&self.shared),
            sink,
            shutdown: shutdown_rx,
            commands: command_rx,
        };

        *running = Some(Running {
            handle: tokio::spawn(task.run()),
            shutdown_tx,
            command_tx,
        });

        true
    }

    /// Replace the tracked symbol universe, incrementally unsubscribing removed symbols
    /// and subscribing added ones on the live connection.
    pub fn update_symbols(&self, symbols: &[Symbol]) {
        let next = normalise_universe(symbols);

        let (added, removed) = {
            let mut current = self.shared.symbols.write();
            let added = next
                .iter()
                .filter(|symbol| current.binary_search(symbol).is_err())
                .cloned()
                .collect::<Vec<_>>();
            let removed = current
                .iter()
                .filter(|symbol| next.binary_search(symbol).is_err())
                .cloned()
                .collect::<Vec<_>>();
            *current = next;
            (added, removed)
        };

        if added.is_empty() && removed.is_empty() {
            return;
        }

        info!(
            feed = %self.feed(),
            added = added.len(),
            removed = removed.len(),
            "updating connector symbols"
        );

        if let Some(running) = self.running.lock().as_ref() {
            let _ = running
                .command_tx
                .send(Command::Resubscribe { added, removed });
        }
    }

    /// Close the socket and cancel every pending timer of this connector.
    pub async fn stop(&self) {
        let running = self.running.lock().take();

        if let Some(Running {
            mut handle,
            shutdown_tx,
            ..
        }) = running
        {
            let _ = shutdown_tx.send(true);
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!(feed = %self.feed(), "connector did not stop gracefully, aborting");
                handle.abort();
            }
        }

        self.shared
            .update_state(|state| state.socket = SocketStatus::Disconnected);
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Connected with a closed circuit. While `false`, callers fall back to polled data.
    pub fn is_available(&self) -> bool {
        self.shared.state.read().is_available()
    }

    pub fn state(&self) -> ConnectorState {
        let mut state = self.shared.state.read().clone();
        state.excluded = self.excluded();
        state
    }

    pub fn excluded(&self) -> Vec<Symbol> {
        let mut excluded = self.shared.excluded.read().iter().cloned().collect::<Vec<_>>();
        excluded.sort();
        excluded
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.shared.symbols.read().clone()
    }
}

/// Normalise, sort & deduplicate a symbol universe.
pub fn normalise_universe(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut universe = symbols
        .iter()
        .map(|symbol| normalise_symbol(symbol))
        .filter(|symbol| !symbol.is_empty())
        .collect::<Vec<_>>();
    universe.sort();
    universe.dedup();
    universe
}

enum SessionEnd {
    Shutdown,
    Closed,
    Errored(DataError),
}

struct ConnectorTask {
    connector: Arc<dyn Connector>,
    config: ConnectorConfig,
    shared: Arc<Shared>,
    sink: EventSink,
    shutdown: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectorTask {
    async fn run(mut self) {
        let feed = self.connector.feed();
        let urls = self.connector.urls();
        let mut breaker = CircuitBreaker::new(self.config.circuit);
        let mut url_index = 0usize;

        info!(%feed, "connector starting");

        loop {
            if let Permit::Denied { retry_at } = breaker.try_acquire(std::time::Instant::now()) {
                self.shared
                    .update_state(|state| state.circuit = breaker.state());
                warn!(
                    %feed,
                    wait_secs = retry_at
                        .saturating_duration_since(std::time::Instant::now())
                        .as_secs(),
                    "circuit open, waiting for cooldown"
                );
                if self.sleep_until(Instant::from_std(retry_at)).await.is_break() {
                    break;
                }
                // Cooldown over: start again from the primary url
                url_index = 0;
                continue;
            }

            let Some(url) = urls.get(url_index % urls.len().max(1)).copied() else {
                warn!(%feed, "connector has no urls configured");
                break;
            };

            self.shared.update_state(|state| {
                state.socket = SocketStatus::Connecting;
                state.circuit = breaker.state();
                state.url = Some(url.to_string());
            });

            let connect_timeout = self.config.connect_timeout;
            let connected = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = tokio::time::timeout(connect_timeout, connect_async(url)) => result,
            };

            let error = match connected {
                Ok(Ok((websocket, _))) => {
                    breaker.record_success();
                    info!(%feed, url, "connected");
                    self.shared.update_state(|state| {
                        state.socket = SocketStatus::Connected;
                        state.circuit = CircuitState::Closed;
                        state.consecutive_failures = 0;
                        state.last_error = None;
                    });

                    match self.session(websocket).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => None,
                        SessionEnd::Errored(error) => Some(error),
                    }
                }
                Ok(Err(error)) => Some(DataError::from(error)),
                Err(_) => Some(DataError::Socket(format!(
                    "connect timeout after {}s",
                    connect_timeout.as_secs()
                ))),
            };

            self.shared
                .update_state(|state| state.socket = SocketStatus::Disconnected);

            if let Some(error) = error {
                url_index = url_index.wrapping_add(1);

                let now = std::time::Instant::now();
                let circuit = if error.is_region_block() {
                    warn!(%feed, url, %error, "connection blocked for this region, tripping circuit");
                    breaker.record_block(now)
                } else {
                    warn!(
                        %feed,
                        url,
                        %error,
                        consecutive_failures = breaker.consecutive_failures() + 1,
                        "connection failed"
                    );
                    breaker.record_failure(now)
                };

                self.shared.update_state(|state| {
                    state.consecutive_failures = breaker.consecutive_failures();
                    state.circuit = circuit;
                    state.last_error = Some(error.to_string());
                });

                if circuit == CircuitState::Open {
                    continue;
                }
            } else {
                info!(%feed, url, "connection closed by server");
            }

            let delay = self.config.backoff.delay(breaker.consecutive_failures());
            debug!(%feed, delay_secs = delay.as_secs_f64(), "reconnecting after backoff");
            if self.sleep(delay).await.is_break() {
                break;
            }
        }

        self.shared
            .update_state(|state| state.socket = SocketStatus::Disconnected);
        info!(%feed, "connector stopped");
    }

    async fn session(
        &mut self,
        websocket: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> SessionEnd {
        let feed = self.connector.feed();
        let (mut write, read) = websocket.split();
        let mut read = TimeoutStream::new(read, self.config.read_timeout);

        // Commands queued while disconnected are superseded by the current universe
        while self.commands.try_recv().is_ok() {}

        let symbols = self.shared.active_symbols();
        let mut tracked = symbols.iter().cloned().collect::<FnvHashSet<_>>();
        if let Err(error) = self
            .send_batches(&mut write, self.connector.subscribe(&symbols))
            .await
        {
            return SessionEnd::Errored(error);
        }
        debug!(%feed, symbols = symbols.len(), "subscriptions sent");

        let ping = self.connector.ping();
        let mut ping_timer = ping.map(|ping| {
            let mut timer = tokio::time::interval_at(Instant::now() + ping.interval, ping.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                Some(command) = self.commands.recv() => {
                    let Command::Resubscribe { added, removed } = command;
                    let excluded = self.shared.excluded.read().clone();

                    let removed = removed
                        .into_iter()
                        .filter(|symbol| tracked.remove(symbol))
                        .collect::<Vec<_>>();
                    let added = added
                        .into_iter()
                        .filter(|symbol| symbol.as_str() != QUOTE_ASSET && !excluded.contains(symbol))
                        .filter(|symbol| tracked.insert(symbol.clone()))
                        .collect::<Vec<_>>();

                    let mut requests = self.connector.unsubscribe(&removed);
                    requests.extend(self.connector.subscribe(&added));
                    if let Err(error) = self.send_batches(&mut write, requests).await {
                        return SessionEnd::Errored(error);
                    }
                }
                _ = tick(ping_timer.as_mut()) => {
                    if let Some(ping) = &ping {
                        if let Err(error) = write.send((ping.ping)()).await {
                            return SessionEnd::Errored(DataError::from(error));
                        }
                    }
                }
                message = read.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        for symbol in self.handle_text(&tracked, text.as_str()) {
                            tracked.remove(&symbol);
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(%feed, ?frame, "received close frame");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return SessionEnd::Errored(error),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    /// Dispatch parsed events and return any symbols the exchange rejected.
    fn handle_text(&self, tracked: &FnvHashSet<Symbol>, text: &str) -> Vec<Symbol> {
        let feed = self.connector.feed();
        let ctx = ParseContext {
            symbols: tracked,
            received: Utc::now(),
        };

        let events = match self.connector.parse(&ctx, text) {
            Ok(events) => events,
            Err(error) => {
                debug!(%feed, %error, "dropping unprocessable message");
                return vec![];
            }
        };

        let mut rejected = vec![];
        for event in events {
            match event {
                ConnectorEvent::Market(event) => (self.sink)(event),
                ConnectorEvent::Rejected { symbol, reason } => {
                    if self.shared.excluded.write().insert(symbol.clone()) {
                        warn!(%feed, %symbol, %reason, "symbol rejected, excluding from future subscriptions");
                    }
                    rejected.push(symbol);
                }
            }
        }
        rejected
    }

    async fn send_batches<S>(&self, write: &mut S, requests: Vec<WsMessage>) -> Result<(), DataError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        let delay = self.connector.batch_delay();
        for (index, request) in requests.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            write.send(request).await?;
        }
        Ok(())
    }

    async fn sleep(&mut self, duration: Duration) -> ControlFlow<()> {
        self.sleep_until(Instant::now() + duration).await
    }

    async fn sleep_until(&mut self, deadline: Instant) -> ControlFlow<()> {
        tokio::select! {
            _ = self.shutdown.changed() => ControlFlow::Break(()),
            _ = tokio::time::sleep_until(deadline) => ControlFlow::Continue(()),
        }
    }
}

async fn tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
