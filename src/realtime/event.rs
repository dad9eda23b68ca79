use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Tag identifying a class of event delivered through the bus.
///
/// The known variants cover everything the tutoring service emits today.
/// Anything else arrives as `Other` and is still routable by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Synthesized when the transport reports a completed handshake.
    Connected,
    /// Synthesized when the link goes away, for whatever reason.
    Disconnect,
    /// Synthesized when a connect attempt ends before the handshake completed.
    ConnectionFailed,
    ChatResponse,
    ChatError,
    TrainingStarted,
    TrainingProgress,
    TrainingCompleted,
    TrainingFailed,
    TrainingDataAdded,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectionFailed => "connection_failed",
            EventKind::ChatResponse => "chat_response",
            EventKind::ChatError => "chat_error",
            EventKind::TrainingStarted => "training_started",
            EventKind::TrainingProgress => "training_progress",
            EventKind::TrainingCompleted => "training_completed",
            EventKind::TrainingFailed => "training_failed",
            EventKind::TrainingDataAdded => "training_data_added",
            EventKind::Other(name) => name,
        }
    }

    /// Lifecycle events produced by the bus itself rather than relayed from the peer.
    pub fn is_synthesized(&self) -> bool {
        matches!(
            self,
            EventKind::Connected | EventKind::Disconnect | EventKind::ConnectionFailed
        )
    }

    /// The four events describing a model training run.
    pub fn training() -> [EventKind; 4] {
        [
            EventKind::TrainingStarted,
            EventKind::TrainingProgress,
            EventKind::TrainingCompleted,
            EventKind::TrainingFailed,
        ]
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "connected" => EventKind::Connected,
            "disconnect" => EventKind::Disconnect,
            "connection_failed" => EventKind::ConnectionFailed,
            "chat_response" => EventKind::ChatResponse,
            "chat_error" => EventKind::ChatError,
            "training_started" => EventKind::TrainingStarted,
            "training_progress" => EventKind::TrainingProgress,
            "training_completed" => EventKind::TrainingCompleted,
            "training_failed" => EventKind::TrainingFailed,
            "training_data_added" => EventKind::TrainingDataAdded,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        EventKind::from(name.as_str())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a `chat_message` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub problem: Option<String>,
    pub solution: Option<String>,
    pub confidence: Option<f64>,
    pub timestamp: Option<String>,

    /// Fields the service added that this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatFailure {
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Training run record, shared by the `training_*` events and the status poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    #[serde(alias = "isTraining")]
    pub is_training: Option<bool>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    #[serde(alias = "trainingId")]
    pub training_id: Option<String>,
}

impl TrainingStatus {
    /// Progress clamped to 0..=100.
    pub fn percent(&self) -> f64 {
        self.progress.unwrap_or(0.0).clamp(0.0, 100.0)
    }
}

/// Broadcast after somebody contributes a new training example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingDataNotice {
    pub id: Option<i64>,
    pub problem_text: Option<String>,
    pub contributor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDown {
    pub reason: String,
}

/// Typed view of an event payload, decoded once when the event enters the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Connected,
    Disconnected(LinkDown),
    ConnectionFailed(LinkDown),
    ChatResponse(ChatReply),
    ChatError(ChatFailure),
    Training(TrainingStatus),
    TrainingDataAdded(TrainingDataNotice),
    /// Unknown event name, or a payload that did not match the expected shape.
    Opaque,
}

/// One event as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    payload: Value,
    data: EventData,
    received_at: DateTime<Utc>,
}

impl Event {
    /// Wrap an event relayed from the peer. The payload is kept verbatim;
    /// the typed view falls back to `Opaque` when it does not decode.
    pub fn inbound(name: &str, payload: Value) -> Self {
        let kind = EventKind::from(name);
        let data = decode(&kind, &payload);
        Self {
            kind,
            payload,
            data,
            received_at: Utc::now(),
        }
    }

    pub fn connected() -> Self {
        Self {
            kind: EventKind::Connected,
            payload: Value::Null,
            data: EventData::Connected,
            received_at: Utc::now(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        let down = LinkDown {
            reason: reason.into(),
        };
        Self {
            kind: EventKind::Disconnect,
            payload: json!({ "reason": down.reason }),
            data: EventData::Disconnected(down),
            received_at: Utc::now(),
        }
    }

    pub fn connection_failed(reason: impl Into<String>) -> Self {
        let down = LinkDown {
            reason: reason.into(),
        };
        Self {
            kind: EventKind::ConnectionFailed,
            payload: json!({ "reason": down.reason }),
            data: EventData::ConnectionFailed(down),
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        self.kind.as_str()
    }

    /// Payload exactly as the peer sent it (or as the bus synthesized it).
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn chat_reply(&self) -> Option<&ChatReply> {
        match &self.data {
            EventData::ChatResponse(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn training_status(&self) -> Option<&TrainingStatus> {
        match &self.data {
            EventData::Training(status) => Some(status),
            _ => None,
        }
    }
}

fn decode(kind: &EventKind, payload: &Value) -> EventData {
    let decoded = match kind {
        EventKind::ChatResponse => from_payload(payload).map(EventData::ChatResponse),
        EventKind::ChatError => from_payload(payload).map(EventData::ChatError),
        EventKind::TrainingStarted
        | EventKind::TrainingProgress
        | EventKind::TrainingCompleted
        | EventKind::TrainingFailed => from_payload(payload).map(EventData::Training),
        EventKind::TrainingDataAdded => from_payload(payload).map(EventData::TrainingDataAdded),
        EventKind::Disconnect => from_payload(payload).map(EventData::Disconnected),
        EventKind::ConnectionFailed => from_payload(payload).map(EventData::ConnectionFailed),
        EventKind::Connected => Ok(EventData::Connected),
        EventKind::Other(_) => Ok(EventData::Opaque),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!("relaying {kind} with unrecognized payload shape: {e}");
        EventData::Opaque
    })
}

fn from_payload<T: for<'de> Deserialize<'de>>(payload: &Value) -> serde_json::Result<T> {
    T::deserialize(payload)
}
