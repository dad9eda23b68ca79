//! Socket.IO v4 framing over Engine.IO v4 WebSocket text frames.
//!
//! Only the subset the tutoring service uses is understood: engine
//! open/close/ping/pong, namespace connect/disconnect/connect-error and
//! plain events. Acks and binary attachments are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::command::Command;

/// Engine.IO open packet body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect. Client side carries the auth object, server side the sid.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Option<Value> },
    ConnectError(Value),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("unsupported packet type {0:?}")]
    Unsupported(char),
    #[error("malformed event frame")]
    MalformedEvent,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, payload } => {
                let mut args = vec![Value::String(name.clone())];
                if let Some(payload) = payload {
                    args.push(payload.clone());
                }
                format!("42{}", Value::Array(args))
            }
            Packet::ConnectError(body) => format!("44{body}"),
        }
    }

    pub fn decode(frame: &str) -> Result<Packet, CodecError> {
        let mut chars = frame.chars();
        let engine = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();

        match engine {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            // Probe payloads ("2probe") only appear during transport upgrades
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => decode_socket(rest),
            '5' => Err(CodecError::Unsupported(engine)),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

fn decode_socket(body: &str) -> Result<Packet, CodecError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' => {
            if rest.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(serde_json::from_str(rest)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let args = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut values = match serde_json::from_str::<Value>(args)? {
                Value::Array(values) => values.into_iter(),
                _ => return Err(CodecError::MalformedEvent),
            };
            let name = match values.next() {
                Some(Value::String(name)) => name,
                _ => return Err(CodecError::MalformedEvent),
            };
            Ok(Packet::Event {
                name,
                payload: values.next(),
            })
        }
        '4' => {
            let body = if rest.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(rest)?
            };
            Ok(Packet::ConnectError(body))
        }
        '3' | '5' | '6' => Err(CodecError::Unsupported(kind)),
        other => Err(CodecError::UnknownType(other)),
    }
}

/// Drop a leading `/namespace,` prefix; only the default namespace is used.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

impl From<&Command> for Packet {
    fn from(command: &Command) -> Self {
        Packet::Event {
            name: command.name().to_string(),
            payload: command.payload(),
        }
    }
}

/// Human-readable reason carried by a connect-error packet.
pub fn connect_error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// WebSocket endpoint for a service base URL such as `http://localhost:5000`.
pub fn socket_url(base: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).map_err(|e| anyhow::anyhow!("invalid ws url: {e}"))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("unsupported url scheme: {other}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot switch {base} to {scheme}"))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");

    Ok(url)
}
