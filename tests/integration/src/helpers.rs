//! Mock gateway
//!
//! A WebSocket server speaking just enough of the gateway protocol: HELLO on
//! connect, READY for IDENTIFY, RESUMED for RESUME and an ack for every heartbeat.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use shard_gateway::protocol::{GatewayMessage, HelloPayload, OpCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Session-opening frame the gateway received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume,
}

/// One recorded handshake
#[derive(Debug, Clone)]
pub struct HandshakeRecord {
    pub shard_id: u32,
    pub kind: Handshake,
    pub at: Instant,
}

#[derive(Default)]
struct GatewayState {
    handshakes: Mutex<Vec<HandshakeRecord>>,
    /// Close-code senders of the live connection per shard
    connections: Mutex<HashMap<u32, mpsc::UnboundedSender<u16>>>,
}

/// In-process gateway bound to a random local port
pub struct MockGateway {
    pub addr: SocketAddr,
    state: Arc<GatewayState>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    /// Bind and start accepting connections
    pub async fn start(heartbeat_interval: u64) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(GatewayState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, state, heartbeat_interval).await {
                        tracing::debug!(error = %e, "Mock connection ended");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn handshakes(&self) -> Vec<HandshakeRecord> {
        self.state.handshakes.lock().clone()
    }

    /// Close a shard's live connection with `code`
    pub fn close_shard(&self, shard_id: u32, code: u16) -> Result<()> {
        let connections = self.state.connections.lock();
        let tx = connections
            .get(&shard_id)
            .with_context(|| format!("shard {shard_id} is not connected"))?;
        tx.send(code).context("connection already gone")
    }
}

async fn serve(stream: TcpStream, state: Arc<GatewayState>, heartbeat_interval: u64) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<u16>();
    let mut seq = 0_u64;

    let hello = GatewayMessage::hello(&HelloPayload::with_interval(heartbeat_interval));
    sink.send(Message::Text(hello.to_json()?)).await?;

    loop {
        let frame = tokio::select! {
            code = close_rx.recv() => {
                let Some(code) = code else { return Ok(()) };
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: "closed by test".into(),
                };
                sink.send(Message::Close(Some(frame))).await?;
                return Ok(());
            }
            frame = source.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };
        let message = GatewayMessage::from_json(&text)?;
        let d = message.d.unwrap_or_default();

        let reply = match message.op {
            OpCode::Heartbeat => GatewayMessage::heartbeat_ack(),
            OpCode::Identify => {
                let shard_id = d["shard"][0].as_u64().unwrap_or(0) as u32;
                record(&state, shard_id, Handshake::Identify, &close_tx);
                seq += 1;
                GatewayMessage::dispatch(
                    "READY",
                    seq,
                    json!({
                        "session_id": format!("session-{shard_id}"),
                        "guilds": [],
                        "user": { "bot": true }
                    }),
                )
            }
            OpCode::Resume => {
                let shard_id = d["session_id"]
                    .as_str()
                    .and_then(|s| s.strip_prefix("session-"))
                    .and_then(|id| id.parse().ok())
                    .context("unknown session")?;
                record(&state, shard_id, Handshake::Resume, &close_tx);
                seq = d["seq"].as_u64().unwrap_or(seq) + 1;
                GatewayMessage::dispatch("RESUMED", seq, json!({}))
            }
            _ => continue,
        };
        sink.send(Message::Text(reply.to_json()?)).await?;
    }
}

fn record(
    state: &GatewayState,
    shard_id: u32,
    kind: Handshake,
    close_tx: &mpsc::UnboundedSender<u16>,
) {
    state.handshakes.lock().push(HandshakeRecord {
        shard_id,
        kind,
        at: Instant::now(),
    });
    state.connections.lock().insert(shard_id, close_tx.clone());
}
