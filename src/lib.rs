//! # Math Mentor client
//!
//! Client library for the Math Mentor tutoring service: a realtime event bus
//! over one persistent Socket.IO link, plus the REST endpoints for auth,
//! solving and training data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use math_mentor::{ClientConfig, EventBus, EventKind, SessionStore, WsTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let session = Arc::new(SessionStore::open(config.session_path()));
//!     let transport = WsTransport::new(&config.ws_url, config.connect_timeout)?;
//!
//!     let bus = EventBus::with_credentials(transport, session);
//!     let _answers = bus.listen(EventKind::ChatResponse, |event| {
//!         println!("{}", event.payload());
//!     });
//!
//!     bus.connect();
//!     bus.send_chat_message("Solve 2x + 5 = 15");
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod views;

// Re-export main types for library consumers
pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult, ErrorCategory};
pub use realtime::{
    Command, ConnectionState, Event, EventBus, EventKind, Handler, LoopbackTransport,
    Subscription, TrainingStatus, WsTransport,
};
pub use session::SessionStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
