use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::command::Command;
use super::event::{Event, EventKind};
use super::registry::{Handler, Registry};
use super::transport::{Link, Transport, TransportEvent};

const BUS_CAPACITY: usize = 1024;

/// Where the bus gets the bearer credential presented at connect time.
pub trait CredentialSource: Send + Sync {
    fn credential(&self) -> Option<String>;
}

impl CredentialSource for Option<String> {
    fn credential(&self) -> Option<String> {
        self.clone()
    }
}

impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    fn credential(&self) -> Option<String> {
        (**self).credential()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Handshake in flight. Never signaled to subscribers.
    Connecting,
    Connected,
}

struct Connection {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
    pump: JoinHandle<()>,
}

struct LinkState {
    state: ConnectionState,
    generation: u64,
    current: Option<Connection>,
}

impl LinkState {
    fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }
}

struct Inner {
    transport: Box<dyn Transport>,
    credentials: Option<Box<dyn CredentialSource>>,
    registry: Mutex<Registry>,
    link: Mutex<LinkState>,
    /// Held for every lifecycle change plus the dispatch that reports it.
    /// Reentrant so callbacks may call `disconnect` on the dispatching thread.
    turn: ReentrantMutex<()>,
    tx: broadcast::Sender<Event>,
}

/// Gateway between one persistent peer connection and any number of subscribers.
///
/// Construct one per process (or session) and hand clones to whoever needs it;
/// all clones share the same connection and subscriber set.
///
/// Callbacks run synchronously on the connection's task, in transport order
/// for any single event name. They must not block: a `disconnect` from another
/// thread waits for the dispatch in progress to finish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::build(Box::new(transport), None)
    }

    pub fn with_credentials(
        transport: impl Transport + 'static,
        credentials: impl CredentialSource + 'static,
    ) -> Self {
        Self::build(Box::new(transport), Some(Box::new(credentials)))
    }

    fn build(
        transport: Box<dyn Transport>,
        credentials: Option<Box<dyn CredentialSource>>,
    ) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                registry: Mutex::new(Registry::new()),
                link: Mutex::new(LinkState {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    current: None,
                }),
                turn: ReentrantMutex::new(()),
                tx,
            }),
        }
    }

    /// Open the link unless one already exists. Returns immediately; the
    /// outcome arrives later as `connected` or `disconnect`.
    pub fn connect(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!("realtime connect requested outside a Tokio runtime");
            return;
        }

        let mut link = self.inner.link.lock();
        if link.current.is_some() {
            tracing::debug!("connect ignored: link already {:?}", link.state);
            return;
        }

        link.generation += 1;
        let generation = link.generation;

        let credential = self
            .inner
            .credentials
            .as_ref()
            .and_then(|source| source.credential());
        if credential.is_none() {
            tracing::debug!("opening realtime link without a credential");
        }

        let Link { commands, events } = self.inner.transport.open(credential);
        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), generation, events));

        link.state = ConnectionState::Connecting;
        link.current = Some(Connection {
            generation,
            commands,
            pump,
        });
        tracing::info!("realtime link #{generation} connecting");
    }

    /// Tear down the link if there is one. No-op when already disconnected.
    pub fn disconnect(&self) {
        let _turn = self.inner.turn.lock();
        let (previous, connection) = {
            let mut link = self.inner.link.lock();
            let Some(connection) = link.current.take() else {
                return;
            };
            let previous = link.state;
            link.state = ConnectionState::Disconnected;
            (previous, connection)
        };

        // Closing the command channel is the transport's cue to leave
        let Connection {
            generation,
            commands,
            pump,
        } = connection;
        drop(commands);
        pump.abort();
        tracing::info!("realtime link #{generation} closed by client");

        if previous == ConnectionState::Connected {
            self.inner
                .dispatch(&Event::disconnected("io client disconnect"), None);
        }
    }

    /// Register `handler` for `kind`. Registering the same handler twice is a no-op.
    pub fn on(&self, kind: impl Into<EventKind>, handler: &Handler) {
        self.inner
            .registry
            .lock()
            .insert(kind.into(), handler.clone());
    }

    /// Remove exactly this handler/kind pair. Takes effect immediately, even
    /// for a dispatch pass that is already running.
    pub fn off(&self, kind: impl Into<EventKind>, handler: &Handler) {
        self.inner.registry.lock().remove(&kind.into(), handler);
    }

    /// Register a closure and get a guard that unsubscribes it on drop.
    pub fn listen(
        &self,
        kind: impl Into<EventKind>,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.listen_all([kind.into()], f)
    }

    /// Same closure for several kinds, one guard for all of them.
    pub fn listen_all(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let handler = Handler::new(f);
        let kinds: Vec<EventKind> = kinds.into_iter().collect();
        {
            let mut registry = self.inner.registry.lock();
            for kind in &kinds {
                registry.insert(kind.clone(), handler.clone());
            }
        }
        Subscription {
            bus: Arc::downgrade(&self.inner),
            kinds,
            handler,
        }
    }

    /// Every dispatched event, delivered after the callbacks for it ran.
    /// Late receivers miss what already happened; slow ones may lag.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.tx.subscribe()
    }

    pub fn subscriber_count(&self, kind: impl Into<EventKind>) -> usize {
        self.inner.registry.lock().count(&kind.into())
    }

    /// Connected/not-connected projection of the link state.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Publish a named command. Dropped silently unless connected.
    pub fn send(&self, name: &str, payload: Value) {
        self.publish(Command::named(name, payload));
    }

    pub fn send_chat_message(&self, problem: impl Into<String>) {
        self.publish(Command::ChatMessage {
            problem: problem.into(),
        });
    }

    pub fn start_training(&self) {
        self.publish(Command::StartTraining);
    }

    /// At most once, no acknowledgement, no queueing while disconnected.
    pub fn publish(&self, command: Command) {
        let link = self.inner.link.lock();
        match (link.state, link.current.as_ref()) {
            (ConnectionState::Connected, Some(connection)) => {
                if let Err(e) = connection.commands.send(command) {
                    tracing::debug!("dropping {}: transport already gone", e.0.name());
                }
            }
            (state, _) => {
                tracing::debug!("dropping {} while {state:?}", command.name());
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Returns false once this link has nothing more to deliver.
    fn on_transport(&self, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Open => {
                let _turn = self.turn.lock();
                {
                    let mut link = self.link.lock();
                    if !link.is_current(generation) {
                        return false;
                    }
                    if link.state == ConnectionState::Connected {
                        return true;
                    }
                    link.state = ConnectionState::Connected;
                }
                tracing::info!("realtime link #{generation} connected");
                self.dispatch(&Event::connected(), Some(generation));
                true
            }
            TransportEvent::Message { name, payload } => {
                let _turn = self.turn.lock();
                if !self.link.lock().is_current(generation) {
                    tracing::debug!("discarding {name} from stale link #{generation}");
                    return false;
                }
                // Lifecycle events only ever come from the bus itself
                if EventKind::from(name.as_str()).is_synthesized() {
                    tracing::debug!("ignoring peer event {name}: {payload}");
                    return true;
                }
                self.dispatch(&Event::inbound(&name, payload), Some(generation));
                true
            }
            TransportEvent::Error(message) => {
                tracing::warn!("realtime transport error: {message}");
                true
            }
            TransportEvent::Closed { reason } => {
                self.link_lost(generation, reason);
                false
            }
        }
    }

    fn link_lost(&self, generation: u64, reason: String) {
        let _turn = self.turn.lock();
        let previous = {
            let mut link = self.link.lock();
            if !link.is_current(generation) {
                return;
            }
            let previous = link.state;
            link.state = ConnectionState::Disconnected;
            link.current = None;
            previous
        };

        if previous == ConnectionState::Connecting {
            tracing::warn!("realtime connect attempt failed: {reason}");
            self.dispatch(&Event::connection_failed(reason.clone()), None);
        } else {
            tracing::info!("realtime link #{generation} lost: {reason}");
        }
        self.dispatch(&Event::disconnected(reason), None);
    }

    /// Run every callback for `event`, then broadcast it. `source` names the
    /// link an inbound event came from; once that link is gone (a callback
    /// disconnected) the rest of the pass is dropped.
    fn dispatch(&self, event: &Event, source: Option<u64>) {
        let handlers = self.registry.lock().snapshot(event.kind());
        let live = || source.map_or(true, |generation| self.link.lock().is_current(generation));

        for handler in handlers {
            if !live() {
                tracing::debug!("{} outlived its link", event.kind());
                return;
            }
            // Unsubscribed by an earlier callback in this same pass
            if !self.registry.lock().contains(event.kind(), &handler) {
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| handler.call(event))).is_err() {
                tracing::warn!("subscriber for {} panicked", event.kind());
            }
        }

        if live() {
            let _ = self.tx.send(event.clone());
        }
    }
}

async fn pump(
    bus: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = bus.upgrade() else {
            return;
        };
        if !inner.on_transport(generation, event) {
            return;
        }
    }

    // Transport vanished without saying goodbye
    if let Some(inner) = bus.upgrade() {
        inner.link_lost(generation, "transport close".to_string());
    }
}

/// Unsubscribes its handler from every kind it was registered for when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<Inner>,
    kinds: Vec<EventKind>,
    handler: Handler,
}

impl Subscription {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut registry = inner.registry.lock();
            for kind in &self.kinds {
                registry.remove(kind, &self.handler);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kinds", &self.kinds)
            .finish()
    }
}
