use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::realtime::{Event, EventBus, EventData, EventKind, Subscription};

const FALLBACK_ERROR: &str = "Failed to process message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    pub confidence: Option<f64>,
    pub at: DateTime<Utc>,
    /// Raw event payload; `Null` for entries typed locally.
    pub payload: Value,
}

impl ChatEntry {
    fn user(problem: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::User,
            text: problem,
            confidence: None,
            at: Utc::now(),
            payload: Value::Null,
        }
    }

    fn from_event(event: &Event) -> Option<Self> {
        let (role, text, confidence) = match event.data() {
            EventData::ChatResponse(reply) => (
                ChatRole::Assistant,
                reply
                    .solution
                    .clone()
                    .unwrap_or_else(|| event.payload().to_string()),
                reply.confidence,
            ),
            EventData::ChatError(failure) => (
                ChatRole::Error,
                failure
                    .error
                    .clone()
                    .unwrap_or_else(|| FALLBACK_ERROR.to_string()),
                None,
            ),
            // Payload of an unexpected shape still shows up in the transcript
            _ if event.kind() == &EventKind::ChatResponse => {
                (ChatRole::Assistant, event.payload().to_string(), None)
            }
            _ if event.kind() == &EventKind::ChatError => {
                (ChatRole::Error, FALLBACK_ERROR.to_string(), None)
            }
            _ => return None,
        };

        Some(Self {
            id: Uuid::new_v4(),
            role,
            text,
            confidence,
            at: event.received_at(),
            payload: event.payload().clone(),
        })
    }
}

/// Chat transcript fed by `chat_response` and `chat_error`.
pub struct ChatFeed {
    bus: EventBus,
    entries: Arc<Mutex<Vec<ChatEntry>>>,
    _subscription: Subscription,
}

impl ChatFeed {
    pub fn new(bus: &EventBus) -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let entries = entries.clone();
            bus.listen_all(
                [EventKind::ChatResponse, EventKind::ChatError],
                move |event| {
                    if let Some(entry) = ChatEntry::from_event(event) {
                        entries.lock().push(entry);
                    }
                },
            )
        };

        Self {
            bus: bus.clone(),
            entries,
            _subscription: subscription,
        }
    }

    /// Record and send a problem. Returns false, recording nothing, for blank
    /// input or while the bus is not connected.
    pub fn submit(&self, problem: &str) -> bool {
        let problem = problem.trim();
        if problem.is_empty() || !self.bus.is_connected() {
            return false;
        }

        self.entries.lock().push(ChatEntry::user(problem.to_string()));
        self.bus.send_chat_message(problem);
        true
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
