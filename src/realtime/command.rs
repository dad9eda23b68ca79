use serde_json::{json, Value};

/// Outbound command published to the peer. Fire-and-forget: no ack, no retry.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the tutor to solve a free-text problem; answered by `chat_response` or `chat_error`.
    ChatMessage { problem: String },

    /// Kick off model retraining; progress arrives as `training_*` events.
    StartTraining,

    /// Any other named command.
    Emit { name: String, payload: Value },
}

impl Command {
    /// Build a command from a wire name, mapping known names onto typed variants.
    pub fn named(name: &str, payload: Value) -> Self {
        match (name, &payload) {
            ("chat_message", Value::Object(map)) => match map.get("problem").and_then(Value::as_str) {
                Some(problem) if map.len() == 1 => Command::ChatMessage {
                    problem: problem.to_string(),
                },
                _ => Command::Emit {
                    name: name.to_string(),
                    payload,
                },
            },
            ("start_training", Value::Null) => Command::StartTraining,
            _ => Command::Emit {
                name: name.to_string(),
                payload,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Command::ChatMessage { .. } => "chat_message",
            Command::StartTraining => "start_training",
            Command::Emit { name, .. } => name,
        }
    }

    /// Payload argument, if the command carries one.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Command::ChatMessage { problem } => Some(json!({ "problem": problem })),
            Command::StartTraining => None,
            Command::Emit { payload, .. } if payload.is_null() => None,
            Command::Emit { payload, .. } => Some(payload.clone()),
        }
    }
}
