//! Connection manager for the event stream.
//!
//! Owns exactly one transport at a time, reconnects with exponential
//! backoff on unexpected closes, and tells an intentional disconnect apart
//! from a dropped connection by detaching close handling before closing.
//!
//! `connect()` and `disconnect()` return immediately. Opening, reading and
//! timers run in spawned tasks; every task checks a link or timer id under
//! the shared lock before acting, so work belonging to a torn-down link or
//! a cancelled timer is inert.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use watchtower_protocol::{ControlFrame, Event, EventType};

use crate::cache::CacheInvalidator;
use crate::config::StreamConfig;
use crate::heartbeat::{FrameSender, HeartbeatMonitor};
use crate::pumps::read::{CloseReason, ReadOutcome, read_pump};
use crate::pumps::write::write_pump;
use crate::reconnection::{PendingReconnect, ReconnectState, cancel_pending};
use crate::router::{EventRouter, HandlerRegistration};
use crate::subscriptions::SubscriptionRegistry;
use crate::token::{AuthEvent, TokenProvider};
use crate::transport::{Connector, Message, StreamError, Transport, TungsteniteConnector};
use crate::types::{ConnectionEvent, ConnectionState};

/// Unexpected closes logged at `warn` before dropping to `debug`.
const LOUD_CLOSE_ATTEMPTS: u32 = 3;

/// Outbound frame queue per link.
const WRITE_QUEUE: usize = 256;

const EVENT_QUEUE: usize = 64;

/// The live transport handle.
struct Link {
    id: u64,
    /// Cancelling detaches close handling and closes the transport.
    cancel: CancellationToken,
    /// Set once the transport is open.
    write_tx: Option<mpsc::Sender<Message>>,
}

struct Shared {
    link: Option<Link>,
    state: ConnectionState,
    policy: ReconnectState,
    reconnect: Option<PendingReconnect>,
    /// Set by `disconnect()`, cleared by `connect()`.
    intentional: bool,
    next_id: u64,
}

struct Inner {
    config: StreamConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    router: Arc<EventRouter>,
    subscriptions: SubscriptionRegistry,
    heartbeat: HeartbeatMonitor,
    shared: Mutex<Shared>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

/// Handle to the event stream client. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager. Nothing connects until [`connect`](Self::connect)
    /// is called or a login is observed by [`watch_auth`](Self::watch_auth).
    pub fn new(
        config: StreamConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let router = Arc::new(EventRouter::new(config.invalidation.clone(), invalidator));

        Self {
            inner: Arc::new(Inner {
                heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
                shared: Mutex::new(Shared {
                    link: None,
                    state: ConnectionState::Idle,
                    policy: ReconnectState::new(&config.reconnect),
                    reconnect: None,
                    intentional: false,
                    next_id: 1,
                }),
                config,
                tokens,
                connector,
                router,
                subscriptions: SubscriptionRegistry::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Creates a manager that connects over `tokio-tungstenite`.
    pub fn with_tungstenite(
        config: StreamConfig,
        tokens: Arc<dyn TokenProvider>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let connector = Arc::new(TungsteniteConnector::new(config.max_message_size));
        Self::new(config, tokens, connector, invalidator)
    }

    /// Opens the event stream, replacing any existing transport.
    ///
    /// Without a credential this only logs and returns.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Closes the event stream. No reconnect can start afterwards until the
    /// next `connect()`.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// `true` iff a transport exists and is open.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().policy.attempts()
    }

    /// Delay of the most recently scheduled reconnect.
    pub fn current_delay(&self) -> Duration {
        self.inner.lock().policy.current_delay()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock().reconnect.is_some()
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.heartbeat.is_running()
    }

    /// Adds event types to the subscription set. When connected, the full
    /// set is sent to the server right away; otherwise it is sent on the
    /// next open.
    pub fn subscribe(&self, event_types: impl IntoIterator<Item = EventType>) {
        let changed = self.inner.subscriptions.add(event_types);
        self.inner.send_subscriptions(changed, true);
    }

    /// Removes event types from the subscription set and re-sends the
    /// remaining set when connected.
    pub fn unsubscribe(&self, event_types: impl IntoIterator<Item = EventType>) {
        let changed = self.inner.subscriptions.remove(event_types);
        self.inner.send_subscriptions(changed, changed);
    }

    /// Current subscription set.
    pub fn subscriptions(&self) -> Vec<EventType> {
        self.inner.subscriptions.snapshot()
    }

    /// Registers a handler for an event type.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerRegistration
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.router.on(event_type, handler)
    }

    /// Takes the lifecycle event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Follows the token provider: connects on login, disconnects on logout.
    pub fn watch_auth(&self) -> JoinHandle<()> {
        let mut rx = self.inner.tokens.auth_events();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let received = rx.recv().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth notifications lagged, resyncing");
                        if inner.tokens.current_token().is_some() {
                            AuthEvent::LoggedIn
                        } else {
                            AuthEvent::LoggedOut
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                match event {
                    AuthEvent::LoggedIn => {
                        info!("login observed, connecting event stream");
                        inner.connect();
                    }
                    AuthEvent::LoggedOut => {
                        info!("logout observed, disconnecting event stream");
                        inner.disconnect();
                    }
                }
            }
            debug!("auth watcher stopped");
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(self: &Arc<Self>) {
        let Some(token) = self.tokens.current_token() else {
            debug!("no credential available, not connecting");
            return;
        };
        let mut shared = self.lock();
        self.open_link(&mut shared, &token);
    }

    /// Replaces any current link with a new attempt. Runs under the shared
    /// lock so no `disconnect()` can interleave.
    fn open_link(self: &Arc<Self>, shared: &mut Shared, token: &str) {
        shared.intentional = false;
        if shared.state == ConnectionState::GivenUp {
            shared.policy.reset_all(&self.config.reconnect);
        }
        cancel_pending(&mut shared.reconnect);
        self.teardown_link(shared);

        let url = match self.config.endpoint_url(token) {
            Ok(url) => url,
            Err(e) => {
                warn!(base_url = %self.config.base_url, "cannot build event stream endpoint: {e}");
                self.schedule_reconnect(shared);
                return;
            }
        };

        let id = shared.next_id;
        shared.next_id += 1;
        let cancel = CancellationToken::new();
        shared.link = Some(Link {
            id,
            cancel: cancel.clone(),
            write_tx: None,
        });
        self.set_state(shared, ConnectionState::Connecting);

        info!(link = id, base_url = %self.config.base_url, "connecting to event stream");
        tokio::spawn(run_link(self.clone(), id, url, cancel));
    }

    fn disconnect(&self) {
        let mut shared = self.lock();
        shared.intentional = true;
        self.heartbeat.stop();
        let had_timer = cancel_pending(&mut shared.reconnect);
        if let Some(link) = shared.link.take() {
            link.cancel.cancel();
            debug!(link = link.id, was_open = link.write_tx.is_some(), "closing event stream");
        }
        if shared.state != ConnectionState::Idle {
            self.set_state(&mut shared, ConnectionState::Idle);
            info!(cancelled_reconnect = had_timer, "event stream disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        is_open(&self.lock())
    }

    /// Drops the current link without touching the intentional flag.
    fn teardown_link(&self, shared: &mut Shared) {
        self.heartbeat.stop();
        if let Some(link) = shared.link.take() {
            link.cancel.cancel();
            debug!(link = link.id, "tore down previous transport");
        }
    }

    fn on_open(self: &Arc<Self>, id: u64, write_tx: mpsc::Sender<Message>) -> bool {
        let mut shared = self.lock();
        match shared.link.as_mut() {
            Some(link) if link.id == id => link.write_tx = Some(write_tx),
            _ => {
                debug!(link = id, "transport opened after teardown, discarding");
                return false;
            }
        }

        shared.policy.reset(&self.config.reconnect);
        self.set_state(&mut shared, ConnectionState::Open);
        info!(link = id, "event stream connected");

        self.heartbeat
            .start(Arc::new(LinkSender(Arc::downgrade(self))));

        if !self.subscriptions.is_empty() {
            let frame = self.subscriptions.frame();
            match send_on(&shared, &frame) {
                Ok(()) => debug!(link = id, count = self.subscriptions.len(), "subscriptions replayed"),
                Err(e) => warn!(link = id, "failed to replay subscriptions: {e}"),
            }
        }
        true
    }

    fn on_closed(self: &Arc<Self>, id: u64, reason: CloseReason) {
        let mut shared = self.lock();
        let current = shared.link.as_ref().is_some_and(|l| l.id == id);
        if shared.intentional || !current {
            trace!(link = id, "close from detached transport ignored");
            return;
        }

        if let Some(link) = shared.link.take() {
            link.cancel.cancel();
        }
        self.heartbeat.stop();

        let attempt = shared.policy.attempts() + 1;
        if attempt <= LOUD_CLOSE_ATTEMPTS {
            warn!(link = id, attempt, "event stream lost: {reason}");
        } else {
            debug!(link = id, attempt, "event stream lost: {reason}");
        }
        self.schedule_reconnect(&mut shared);
    }

    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) {
        cancel_pending(&mut shared.reconnect);

        let Some(delay) = shared.policy.advance(&self.config.reconnect) else {
            error!(
                attempts = shared.policy.attempts(),
                lifetime_attempts = shared.policy.lifetime_attempts(),
                "event stream reconnection gave up, waiting for an explicit connect"
            );
            self.set_state(shared, ConnectionState::GivenUp);
            return;
        };

        let attempt = shared.policy.attempts();
        let id = shared.next_id;
        shared.next_id += 1;
        let cancel = CancellationToken::new();
        shared.reconnect = Some(PendingReconnect {
            id,
            cancel: cancel.clone(),
        });
        self.set_state(shared, ConnectionState::Reconnecting { attempt });
        self.emit(ConnectionEvent::Reconnecting {
            attempt,
            next_retry: delay,
        });
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(attempt, "reconnect timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(id);
            }
        });
    }

    fn fire_reconnect(self: &Arc<Self>, id: u64) {
        // Fetched before locking; the timer is re-checked afterwards.
        let token = self.tokens.current_token();
        let mut shared = self.lock();
        let current = shared.reconnect.as_ref().is_some_and(|timer| timer.id == id);
        if !current || shared.intentional {
            trace!(timer = id, "stale reconnect timer ignored");
            return;
        }
        shared.reconnect = None;

        match token {
            Some(token) => self.open_link(&mut shared, &token),
            None => {
                debug!("no credential when reconnect timer fired, settling idle");
                if shared.link.is_none() {
                    self.set_state(&mut shared, ConnectionState::Idle);
                }
            }
        }
    }

    fn send_subscriptions(&self, changed: bool, send_unchanged: bool) {
        if !changed && !send_unchanged {
            return;
        }
        let shared = self.lock();
        if !is_open(&shared) {
            trace!("subscription stored for next connection");
            return;
        }
        let frame = self.subscriptions.frame();
        match send_on(&shared, &frame) {
            Ok(()) => debug!(count = self.subscriptions.len(), changed, "subscription set sent"),
            Err(e) => warn!("failed to send subscription set: {e}"),
        }
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        shared.state = state.clone();
        self.emit(ConnectionEvent::StateChanged(state));
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("connection event not delivered: {e}");
        }
    }
}

fn is_open(shared: &Shared) -> bool {
    shared
        .link
        .as_ref()
        .and_then(|l| l.write_tx.as_ref())
        .is_some_and(|tx| !tx.is_closed())
}

fn send_on(shared: &Shared, frame: &ControlFrame) -> Result<(), StreamError> {
    let tx = shared
        .link
        .as_ref()
        .and_then(|l| l.write_tx.as_ref())
        .ok_or(StreamError::NotConnected)?;
    let text = frame.to_text()?;
    tx.try_send(Message::Text(text.into())).map_err(|e| match e {
        TrySendError::Full(_) => StreamError::QueueFull,
        TrySendError::Closed(_) => StreamError::NotConnected,
    })
}

/// Heartbeat's view of the connection. Weak so a running heartbeat never
/// keeps the manager alive.
struct LinkSender(Weak<Inner>);

impl FrameSender for LinkSender {
    fn is_connected(&self) -> bool {
        self.0.upgrade().is_some_and(|inner| inner.is_connected())
    }

    fn send(&self, frame: &ControlFrame) -> Result<(), StreamError> {
        let inner = self.0.upgrade().ok_or(StreamError::NotConnected)?;
        let shared = inner.lock();
        send_on(&shared, frame)
    }
}

/// Opens one transport and pumps it until it closes or is detached.
async fn run_link(inner: Arc<Inner>, id: u64, url: Url, cancel: CancellationToken) {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(link = id, "connect attempt abandoned");
            return;
        }
        result = inner.connector.open(url) => result,
    };

    let Transport { sink, stream } = match opened {
        Ok(transport) => transport,
        Err(e) => {
            inner.on_closed(id, CloseReason::OpenFailed(e));
            return;
        }
    };

    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
    tokio::spawn(write_pump(sink, write_rx, cancel.clone()));
    if !inner.on_open(id, write_tx) {
        return;
    }

    let outcome = read_pump(stream, &inner.router, inner.config.max_message_size, &cancel).await;
    if let ReadOutcome::Closed(reason) = outcome {
        inner.on_closed(id, reason);
    }
}
