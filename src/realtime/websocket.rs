use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use super::command::Command;
use super::socketio::{self, Handshake, Packet};
use super::transport::{Link, Transport, TransportEvent};

/// Socket.IO over WebSocket, the transport the tutoring service speaks.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
    connect_timeout: Duration,
}

impl WsTransport {
    /// `base` is the service root, e.g. `http://localhost:5000`.
    pub fn new(base: &str, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: socketio::socket_url(base)?,
            connect_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WsTransport {
    fn open(&self, credential: Option<String>) -> Link {
        let (link, commands, events) = Link::pair();
        tokio::spawn(run(
            self.url.clone(),
            self.connect_timeout,
            credential,
            commands,
            events,
        ));
        link
    }
}

async fn run(
    url: Url,
    connect_timeout: Duration,
    credential: Option<String>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let reason = match session(&url, connect_timeout, credential, &mut commands, &events).await {
        Ok(reason) => reason,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(format!("{e:#}")));
            e.to_string()
        }
    };
    tracing::debug!("socket link to {url} closed: {reason}");
    let _ = events.send(TransportEvent::Closed { reason });
}

/// Drive one connection until it ends. `Ok` carries the close reason.
async fn session(
    url: &Url,
    connect_timeout: Duration,
    credential: Option<String>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<String> {
    let (ws_stream, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| anyhow!("timeout"))?
        .context("websocket handshake failed")?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Engine.IO speaks first with the session parameters
    let handshake = timeout(connect_timeout, read_handshake(&mut ws_rx))
        .await
        .map_err(|_| anyhow!("timeout"))??;

    tracing::debug!(
        "engine session {} (ping {}ms/{}ms)",
        handshake.sid,
        handshake.ping_interval,
        handshake.ping_timeout
    );

    let auth = credential.map(|token| json!({ "token": token }));
    ws_tx
        .send(Message::Text(Packet::Connect(auth).encode().into()))
        .await?;

    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut open = false;
    // Until the namespace accepts us only the connect timeout applies.
    // Afterwards only inbound traffic pushes the deadline out.
    let mut deadline = Instant::now() + connect_timeout;

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                let reason = if open { "ping timeout" } else { "timeout" };
                return Ok(reason.to_string());
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    None => return Ok("transport close".into()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(msg)) => msg,
                };
                if open {
                    deadline = Instant::now() + liveness;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok("transport close".into()),
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                        continue;
                    }
                };

                match Packet::decode(text.as_str()) {
                    Ok(Packet::Ping) => {
                        ws_tx.send(Message::Text(Packet::Pong.encode().into())).await?;
                    }
                    Ok(Packet::Connect(_)) if !open => {
                        open = true;
                        deadline = Instant::now() + liveness;
                        let _ = events.send(TransportEvent::Open);
                    }
                    Ok(Packet::Event { name, payload }) => {
                        let _ = events.send(TransportEvent::Message {
                            name,
                            payload: payload.unwrap_or(Value::Null),
                        });
                    }
                    Ok(Packet::ConnectError(body)) => {
                        return Ok(format!(
                            "connect refused: {}",
                            socketio::connect_error_message(&body)
                        ));
                    }
                    Ok(Packet::Disconnect) => return Ok("io server disconnect".into()),
                    Ok(Packet::Close) => return Ok("transport close".into()),
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(format!("undecodable frame: {e}")));
                    }
                }
            }
            command = commands.recv() => match command {
                Some(command) => {
                    let frame = Packet::from(&command).encode();
                    ws_tx.send(Message::Text(frame.into())).await?;
                }
                None => {
                    // Bus dropped the link: leave the namespace and close politely
                    let _ = ws_tx.send(Message::Text(Packet::Disconnect.encode().into())).await;
                    let _ = ws_tx.close().await;
                    return Ok("io client disconnect".into());
                }
            }
        }
    }
}

async fn read_handshake<S>(ws_rx: &mut S) -> Result<Handshake>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        if let Message::Text(text) = msg? {
            return match Packet::decode(text.as_str())? {
                Packet::Open(handshake) => Ok(handshake),
                other => Err(anyhow!("expected engine open, got {other:?}")),
            };
        }
    }
    Err(anyhow!("transport close"))
}
