use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::config::ReconnectPolicy;
use crate::errors::EnvelopeError;

/// Kinds of server-pushed events the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A meeting recording finished merging.
    MergeComplete,
}

impl EventKind {
    pub const ALL: [EventKind; 1] = [EventKind::MergeComplete];

    pub fn tag(self) -> &'static str {
        match self {
            EventKind::MergeComplete => "merge_complete",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

/// One parsed push message.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub payload: Value,
}

impl EventEnvelope {
    /// Parse a raw channel message.
    ///
    /// The tag is read from `event` (or `kind`). When the object has no
    /// `payload` field, its remaining fields are the payload.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::Malformed("expected a JSON object".into()));
        };

        let tag = match fields.remove("event").or_else(|| fields.remove("kind")) {
            Some(Value::String(tag)) => tag,
            _ => return Err(EnvelopeError::MissingKind),
        };
        let kind = EventKind::from_tag(&tag).ok_or(EnvelopeError::UnknownKind(tag))?;

        let payload = match fields.remove("payload") {
            Some(payload) => payload,
            None => Value::Object(fields),
        };
        Ok(Self { kind, payload })
    }

    /// Typed view of a `merge_complete` payload.
    pub fn merge_complete(&self) -> Option<MergeComplete> {
        if self.kind != EventKind::MergeComplete {
            return None;
        }
        match serde_json::from_value(self.payload.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("merge_complete payload has unexpected shape: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MergeComplete {
    #[serde(default, alias = "meetingId")]
    pub meeting_id: Option<String>,
    #[serde(default, rename = "mergedUrl", alias = "merged_url")]
    pub merged_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Trait for receiving push events.
///
/// Called on the connection task; implementations must be Send + Sync and
/// should hand long work off to a spawned task.
pub trait EventListener: Send + Sync {
    fn on_event(&self, envelope: &EventEnvelope);
}

struct FnListener<F>(F);

impl<F> EventListener for FnListener<F>
where
    F: Fn(&EventEnvelope) + Send + Sync,
{
    fn on_event(&self, envelope: &EventEnvelope) {
        (self.0)(envelope)
    }
}

/// Wrap a closure as a listener. Keep the returned `Arc` to unsubscribe.
pub fn listener_fn<F>(f: F) -> Arc<dyn EventListener>
where
    F: Fn(&EventEnvelope) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

/// Listeners per kind, compared by pointer identity.
#[derive(Default)]
struct SubscriberSet {
    listeners: RwLock<HashMap<EventKind, Vec<Arc<dyn EventListener>>>>,
}

impl SubscriberSet {
    fn insert(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> bool {
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(kind).or_default();
        if entry.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        entry.push(listener);
        true
    }

    fn remove(&self, kind: EventKind, listener: &Arc<dyn EventListener>) -> bool {
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = map.get_mut(&kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| !Arc::ptr_eq(l, listener));
        before != entry.len()
    }

    fn snapshot(&self, kind: EventKind) -> Vec<Arc<dyn EventListener>> {
        let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        map.get(&kind).cloned().unwrap_or_default()
    }

    fn len(&self, kind: EventKind) -> usize {
        let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        map.get(&kind).map_or(0, Vec::len)
    }
}

/// State shared between the bus handle and its connection task.
struct Shared {
    subscribers: SubscriberSet,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Mark the connection dead and publish `Disconnected` in one step, so
    /// anyone who observes the state can immediately start a new connection.
    fn finish(&self, live: &AtomicBool) {
        self.state.send_modify(|state| {
            live.store(false, Ordering::Release);
            *state = ConnectionState::Disconnected;
        });
    }

    fn dispatch(&self, text: &str) -> usize {
        let envelope = match EventEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::UnknownKind(tag)) => {
                tracing::debug!("[events] ignoring event kind '{tag}'");
                return 0;
            }
            Err(e) => {
                tracing::warn!("[events] dropping message: {e}");
                return 0;
            }
        };

        // Iterate a snapshot so listeners may (un)subscribe while we deliver.
        let listeners = self.subscribers.snapshot(envelope.kind);
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(&envelope))).is_err() {
                tracing::error!("[events] listener for {} panicked", envelope.kind.tag());
            }
        }
        listeners.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventBusConfig {
    /// Full WebSocket URL of the push channel.
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/meeting/ws/recordings".to_string(),
            reconnect: ReconnectPolicy::Never,
        }
    }
}

struct Connection {
    shutdown: CancellationToken,
    /// Cleared by the task before it publishes `Disconnected`.
    live: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Connection {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.task.is_finished()
    }
}

static GLOBAL_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Owns the single push connection and fans events out to subscribers.
pub struct EventBus {
    config: EventBusConfig,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                subscribers: SubscriberSet::default(),
                state,
            }),
            connection: Mutex::new(None),
        }
    }

    /// Create the process-wide bus on first call; later calls return it and
    /// ignore `config`.
    pub fn install(config: EventBusConfig) -> Arc<EventBus> {
        GLOBAL_BUS
            .get_or_init(|| Arc::new(EventBus::new(config)))
            .clone()
    }

    pub fn global() -> Option<Arc<EventBus>> {
        GLOBAL_BUS.get().cloned()
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Open the push connection unless one is already live.
    ///
    /// Returns `true` when a new connection task was started. Must be called
    /// from within a tokio runtime.
    pub fn ensure_connected(&self) -> bool {
        let mut connection = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if connection.as_ref().is_some_and(Connection::is_live) {
            return false;
        }

        let shutdown = CancellationToken::new();
        let live = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(connection_loop(
            self.shared.clone(),
            self.config.clone(),
            shutdown.clone(),
            live.clone(),
        ));
        *connection = Some(Connection {
            shutdown,
            live,
            task,
        });
        true
    }

    /// Close the connection. Subscriptions are kept.
    pub async fn disconnect(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(connection) = connection {
            connection.shutdown.cancel();
            if let Err(e) = connection.task.await {
                tracing::warn!("[events] connection task ended abnormally: {e}");
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Register `listener` for `kind`. Returns `false` if it was already registered.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> bool {
        self.shared.subscribers.insert(kind, listener)
    }

    pub fn subscribe_fn<F>(&self, kind: EventKind, f: F) -> Arc<dyn EventListener>
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let listener = listener_fn(f);
        self.subscribe(kind, listener.clone());
        listener
    }

    /// Remove `listener` from `kind`. Unknown listeners are ignored.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Arc<dyn EventListener>) -> bool {
        self.shared.subscribers.remove(kind, listener)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.shared.subscribers.len(kind)
    }

    /// Parse one inbound message and deliver it. Returns how many listeners
    /// were invoked.
    pub fn dispatch_message(&self, text: &str) -> usize {
        self.shared.dispatch(text)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let connection = self
            .connection
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(connection) = connection {
            connection.shutdown.cancel();
        }
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    config: EventBusConfig,
    shutdown: CancellationToken,
    live: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if attempt == 0 {
            shared.set_state(ConnectionState::Connecting);
        }

        let mut connected = false;
        match run_session(&shared, &config.url, &shutdown, &mut connected).await {
            Ok(()) => tracing::info!("[events] closed"),
            Err(e) => tracing::error!("[events] error: {e}"),
        }
        if shutdown.is_cancelled() {
            break;
        }
        if connected {
            attempt = 0;
        }

        attempt += 1;
        let Some(delay) = config.reconnect.delay_for(attempt) else {
            tracing::info!("[events] not reconnecting");
            break;
        };
        shared.set_state(ConnectionState::Reconnecting { attempt });
        tracing::info!("[events] reconnecting in {delay:?} (attempt {attempt})");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    shared.finish(&live);
}

async fn run_session(
    shared: &Shared,
    url: &str,
    shutdown: &CancellationToken,
    connected: &mut bool,
) -> Result<(), tungstenite::Error> {
    let (stream, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        r = connect_async(url) => r?,
    };
    *connected = true;
    shared.set_state(ConnectionState::Connected);
    tracing::info!("[events] connected to {url}");

    let (mut write, mut read) = stream.split();
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!("[events] close frame not sent: {e}");
                }
                return Ok(());
            }
            next = read.next() => next,
        };

        match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(e),
            Some(Ok(Message::Text(text))) => {
                shared.dispatch(text.as_str());
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    shared.dispatch(text);
                }
                Err(_) => tracing::warn!("[events] dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!("[events] server closed: {frame:?}");
                return Ok(());
            }
            Some(Ok(_)) => {}
        }
    }
}
