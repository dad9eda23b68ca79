use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::event::{Event, EventKind};

type Callback = dyn Fn(&Event) + Send + Sync;

/// Shared callback handle.
///
/// Two handles are the same subscriber when they point at the same closure, so
/// keep a clone around to `off` it later. Registering a clone twice is a no-op.
#[derive(Clone)]
pub struct Handler(Arc<Callback>);

impl Handler {
    pub fn new(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: &Event) {
        (self.0)(event)
    }

    pub fn same(&self, other: &Handler) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

/// Subscribers per event kind, with set semantics.
#[derive(Debug, Default)]
pub struct Registry {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the handler was already registered for `kind`.
    pub fn insert(&mut self, kind: EventKind, handler: Handler) -> bool {
        let slot = self.handlers.entry(kind).or_default();
        if slot.iter().any(|h| h.same(&handler)) {
            return false;
        }
        slot.push(handler);
        true
    }

    /// Returns false when nothing matched.
    pub fn remove(&mut self, kind: &EventKind, handler: &Handler) -> bool {
        let Some(slot) = self.handlers.get_mut(kind) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|h| !h.same(handler));
        let removed = slot.len() != before;
        if slot.is_empty() {
            self.handlers.remove(kind);
        }
        removed
    }

    pub fn contains(&self, kind: &EventKind, handler: &Handler) -> bool {
        self.handlers
            .get(kind)
            .is_some_and(|slot| slot.iter().any(|h| h.same(handler)))
    }

    /// Copy of the current subscribers, for iterating without holding the lock.
    pub fn snapshot(&self, kind: &EventKind) -> Vec<Handler> {
        self.handlers.get(kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: &EventKind) -> usize {
        self.handlers.get(kind).map_or(0, Vec::len)
    }
}
