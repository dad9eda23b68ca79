//! Derived state for the parts of a client that render bus traffic.
//!
//! Each view subscribes on construction and unsubscribes when dropped. Views
//! only read from the bus (and publish commands); they never change its
//! connection state.

mod chat;
mod connection;
mod training;

pub use chat::{ChatEntry, ChatFeed, ChatRole};
pub use connection::ConnectionWatch;
pub use training::{TrainingMonitor, TrainingPhase};
