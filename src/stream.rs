// ===============================
// src/stream.rs
// ===============================
//
// Connection manager: one WebSocket per session.
//
// Lifecycle: Idle -> Connecting -> Open -> {Closed -> Reconnecting ->
// Connecting | Idle}. Reconnection is bounded exponential backoff
// (2^attempt seconds, 5 attempts); exhaustion parks the session until the
// caller issues a fresh connect(). Explicit disconnect clears every
// registered callback so nothing stale can fire after teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap as HashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::VenueConfig;
use crate::domain::{MarketTick, OrderState, OrderStatus};
use crate::error::AdapterError;
use crate::metrics;
use crate::venues::VenueAdapter;

/// Reconnects stop after this many consecutive failures.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before reconnect attempt `n` (1-based): 2^n seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000u64 << attempt.min(MAX_RECONNECT_ATTEMPTS))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct SubscriberList<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered callback registry. Dispatch walks entries in registration order;
/// removal is by handle, never by position.
pub struct Subscribers<T> {
    inner: Arc<Mutex<SubscriberList<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubscriberList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, cb: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionHandle {
        let id = {
            let mut list = lock(&self.inner);
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Box::new(cb)));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        SubscriptionHandle {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).entries.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    pub fn dispatch(&self, event: &T) {
        let list = lock(&self.inner);
        for (_, cb) in &list.entries {
            cb(event);
        }
    }

    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its callback on `cancel()`. Dropping the handle without
/// canceling leaves the subscription alive.
pub struct SubscriptionHandle {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn cancel(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// Routes raw frames through the venue normalizer and fans the result out.
/// Order updates pass a lifecycle guard: once an order id reaches a
/// terminal state, later frames for it that regress are dropped.
pub(crate) struct FrameRouter {
    adapter: Arc<dyn VenueAdapter>,
    pub(crate) ticks: Subscribers<MarketTick>,
    pub(crate) orders: Subscribers<OrderStatus>,
    order_states: Mutex<HashMap<String, OrderState>>,
}

impl FrameRouter {
    fn new(adapter: Arc<dyn VenueAdapter>) -> Self {
        Self {
            adapter,
            ticks: Subscribers::new(),
            orders: Subscribers::new(),
            order_states: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn route(&self, raw: &str) {
        let venue = self.adapter.kind().as_str();
        if let Some(tick) = self.adapter.normalize_tick(raw) {
            metrics::TICKS.inc();
            metrics::TICKS_BY_SYMBOL
                .with_label_values(&[venue, &tick.symbol])
                .inc();
            self.ticks.dispatch(&tick);
        } else if let Some(update) = self.adapter.normalize_order_update(raw) {
            if self.accepts(&update) {
                metrics::ORDER_UPDATES
                    .with_label_values(&[venue, update.state.as_str()])
                    .inc();
                self.orders.dispatch(&update);
            } else {
                warn!(
                    venue,
                    order_id = %update.order_id,
                    state = update.state.as_str(),
                    "dropping order update regressing from terminal state"
                );
                metrics::FRAMES_DROPPED.with_label_values(&[venue]).inc();
            }
        } else {
            debug!(venue, "ignoring non-data frame");
            metrics::FRAMES_DROPPED.with_label_values(&[venue]).inc();
        }
    }

    fn accepts(&self, update: &OrderStatus) -> bool {
        let mut states = lock(&self.order_states);
        match states.get(&update.order_id) {
            Some(prev) if !prev.accepts(update.state) => false,
            _ => {
                states.insert(update.order_id.clone(), update.state);
                true
            }
        }
    }

    fn reset(&self) {
        self.ticks.clear();
        self.orders.clear();
        lock(&self.order_states).clear();
    }
}

/// Owns at most one live WebSocket. `connect` replaces any prior session;
/// `disconnect` is terminal until the next explicit `connect`.
pub struct ConnectionManager {
    pub(crate) router: Arc<FrameRouter>,
    connected: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl ConnectionManager {
    pub fn new(adapter: Arc<dyn VenueAdapter>) -> Self {
        Self {
            router: Arc::new(FrameRouter::new(adapter)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
        }
    }

    pub fn on_market_data(
        &self,
        cb: impl Fn(&MarketTick) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.router.ticks.subscribe(cb)
    }

    pub fn on_order_update(
        &self,
        cb: impl Fn(&OrderStatus) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.router.orders.subscribe(cb)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Opens the stream and subscribes to `symbols`. Any previous socket is
    /// shut down first; the two sessions never overlap.
    pub fn connect(&self, cfg: &VenueConfig, symbols: &[String]) -> Result<(), AdapterError> {
        let adapter = Arc::clone(&self.router.adapter);
        let stream_url = adapter.stream_url(cfg);
        let sub_msg = adapter.subscription_message(symbols);
        let venue = adapter.kind().as_str();

        let url = Url::parse(&stream_url)
            .map_err(|e| AdapterError::Connection(format!("bad stream url {stream_url}: {e}")))?;

        let (tx, mut shutdown_rx) = watch::channel(false);
        if let Some(prev) = lock(&self.shutdown).replace(tx) {
            let _ = prev.send(true);
        }

        let router = Arc::clone(&self.router);
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            'session: loop {
                info!(venue, %stream_url, "connecting market data stream");
                match connect_async(url.clone()).await {
                    Ok((mut ws, _resp)) => {
                        info!(venue, "stream connected");
                        attempt = 0;
                        connected.store(true, Ordering::SeqCst);
                        metrics::WS_CONNECTED.with_label_values(&[venue]).set(1);

                        if let Err(e) = ws.send(Message::Text(sub_msg.clone())).await {
                            error!(?e, venue, "subscription handshake failed");
                        }

                        loop {
                            tokio::select! {
                                _ = shutdown_rx.changed() => {
                                    let _ = ws.close(None).await;
                                    break 'session;
                                }
                                frame = ws.next() => match frame {
                                    Some(Ok(m)) if m.is_text() => match m.into_text() {
                                        Ok(txt) => router.route(&txt),
                                        Err(e) => warn!(?e, venue, "unreadable text frame"),
                                    },
                                    Some(Ok(_)) => {} // binary/ping/pong
                                    Some(Err(e)) => {
                                        error!(?e, venue, "stream read error");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                        connected.store(false, Ordering::SeqCst);
                        metrics::WS_CONNECTED.with_label_values(&[venue]).set(0);
                        warn!(venue, "stream disconnected");
                    }
                    Err(e) => {
                        error!(?e, venue, "stream connect failed");
                    }
                }

                if *shutdown_rx.borrow() {
                    break;
                }
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    warn!(venue, "reconnect attempts exhausted, stream idle until next connect");
                    break;
                }
                metrics::WS_RECONNECTS.with_label_values(&[venue]).inc();
                let delay = backoff_delay(attempt);
                info!(venue, attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            metrics::WS_CONNECTED.with_label_values(&[venue]).set(0);
        });
        Ok(())
    }

    /// Closes the socket without touching callback registrations. Used when
    /// a new VenueConfig replaces the old session.
    pub fn close_socket(&self) {
        if let Some(tx) = lock(&self.shutdown).take() {
            let _ = tx.send(true);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Full teardown: socket closed, every callback and tracked order state
    /// cleared, attempt counter implicitly reset for the next connect.
    pub fn disconnect(&self) {
        self.close_socket();
        self.router.reset();
    }
}
