//! Realtime event bus.
//!
//! One [`EventBus`] owns the persistent link to the tutoring service and fans
//! inbound events out to registered callbacks. The link itself is pluggable
//! through [`Transport`]: [`WsTransport`] speaks Socket.IO over WebSocket and
//! [`LoopbackTransport`] keeps everything in memory.

pub mod bus;
pub mod command;
pub mod event;
pub mod loopback;
pub mod registry;
pub mod socketio;
pub mod transport;
pub mod websocket;

pub use bus::{ConnectionState, CredentialSource, EventBus, Subscription};
pub use command::Command;
pub use event::{
    ChatFailure, ChatReply, Event, EventData, EventKind, LinkDown, TrainingDataNotice,
    TrainingStatus,
};
pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use registry::Handler;
pub use transport::{Link, Transport, TransportEvent};
pub use websocket::WsTransport;
