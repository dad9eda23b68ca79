//! In-memory transport for tests and offline demos.
//!
//! The `LoopbackPeer` plays the remote side: it decides when a handshake
//! completes, pushes events and inspects what the bus published.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::command::Command;
use super::transport::{Link, Transport, TransportEvent};

#[derive(Default)]
struct Shared {
    auto_accept: bool,
    credentials: Vec<Option<String>>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    commands: Option<mpsc::UnboundedReceiver<Command>>,
}

pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Remote end of a `LoopbackTransport`.
#[derive(Clone)]
pub struct LoopbackPeer {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackPeer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: shared.clone(),
            },
            LoopbackPeer { shared },
        )
    }

    /// Complete every handshake as soon as the link opens.
    pub fn auto_accept() -> (Self, LoopbackPeer) {
        let (transport, peer) = Self::new();
        transport.shared.lock().auto_accept = true;
        (transport, peer)
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, credential: Option<String>) -> Link {
        let (link, commands, events) = Link::pair();
        let mut shared = self.shared.lock();
        shared.credentials.push(credential);
        if shared.auto_accept {
            let _ = events.send(TransportEvent::Open);
        }
        shared.events = Some(events);
        shared.commands = Some(commands);
        link
    }
}

impl LoopbackPeer {
    /// Number of links the bus has opened so far.
    pub fn opened(&self) -> usize {
        self.shared.lock().credentials.len()
    }

    /// Credentials presented on each open, oldest first.
    pub fn credentials(&self) -> Vec<Option<String>> {
        self.shared.lock().credentials.clone()
    }

    /// Complete the handshake on the current link.
    pub fn accept(&self) -> bool {
        self.push(TransportEvent::Open)
    }

    /// Push a named event to the bus.
    pub fn emit(&self, name: &str, payload: Value) -> bool {
        self.push(TransportEvent::Message {
            name: name.to_string(),
            payload,
        })
    }

    /// Report a transport diagnostic.
    pub fn fail(&self, message: &str) -> bool {
        self.push(TransportEvent::Error(message.to_string()))
    }

    /// Refuse the pending handshake. Same wire outcome as `drop_link`.
    pub fn refuse(&self, reason: &str) -> bool {
        self.drop_link(&format!("connect refused: {reason}"))
    }

    /// Terminate the current link from the peer side.
    pub fn drop_link(&self, reason: &str) -> bool {
        let sent = self.push(TransportEvent::Closed {
            reason: reason.to_string(),
        });
        self.shared.lock().events = None;
        sent
    }

    /// Drain every command the bus published on the current link.
    pub fn outbound(&self) -> Vec<Command> {
        let mut shared = self.shared.lock();
        let mut drained = Vec::new();
        if let Some(commands) = shared.commands.as_mut() {
            while let Ok(command) = commands.try_recv() {
                drained.push(command);
            }
        }
        drained
    }

    /// True once the bus has let go of the current link.
    pub fn link_released(&self) -> bool {
        let mut shared = self.shared.lock();
        match shared.commands.as_mut() {
            Some(commands) => commands.is_closed(),
            None => true,
        }
    }

    fn push(&self, event: TransportEvent) -> bool {
        match self.shared.lock().events.as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}
