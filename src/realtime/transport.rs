use serde_json::Value;
use tokio::sync::mpsc;

use super::command::Command;

/// What a transport reports back to the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed; the link can carry commands.
    Open,

    /// Named event relayed from the peer.
    Message { name: String, payload: Value },

    /// Diagnostic from the underlying channel. Logged, not forwarded.
    Error(String),

    /// The link is gone. Always the last event of a link.
    Closed { reason: String },
}

/// Both halves of one logical connection.
#[derive(Debug)]
pub struct Link {
    /// Dropping this sender asks the transport to disconnect.
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    /// Fresh channel pair: the `Link` for the bus plus the transport's ends.
    pub fn pair() -> (
        Link,
        mpsc::UnboundedReceiver<Command>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        (Link { commands, events }, command_rx, event_tx)
    }
}

/// Opens connections to the remote peer.
///
/// `open` must return immediately; the handshake outcome is reported through
/// `Link::events`. Called from within a Tokio runtime.
pub trait Transport: Send + Sync {
    fn open(&self, credential: Option<String>) -> Link;
}
