//! In-memory transport and shard harness for unit tests

use crate::codec::JsonCodec;
use crate::dispatcher::ChannelDispatcher;
use crate::events::LifecycleEvent;
use crate::pool::PoolMessage;
use crate::protocol::{DispatchEvent, GatewayMessage, HelloPayload, OpCode};
use crate::shard::{self, ShardContext, ShardHandle};
use crate::transport::{
    CloseInfo, Connector, Transport, TransportError, TransportEvent, TransportMessage,
};
use async_trait::async_trait;
use serde_json::Value;
use shard_common::GatewayConfig;
use shard_core::ShardInfo;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the shard wrote to its transport
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Frame(GatewayMessage),
    Close(u16),
}

pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (to_shard, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_shard) = mpsc::unbounded_channel();
        self.peers
            .send(MockPeer {
                to_shard,
                from_shard,
            })
            .map_err(|_| TransportError::Connect("test dropped the peer receiver".into()))?;
        Ok(Box::new(MockTransport { incoming, outgoing }))
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    outgoing: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let TransportMessage::Text(text) = message else {
            return Err(TransportError::Send("binary frame".into()));
        };
        let frame = GatewayMessage::from_json(&text)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.outgoing
            .send(Sent::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> TransportEvent {
        self.incoming
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(None))
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        self.outgoing
            .send(Sent::Close(code))
            .map_err(|_| TransportError::Closed)
    }
}

/// The gateway's end of one mock connection
pub(crate) struct MockPeer {
    to_shard: mpsc::UnboundedSender<TransportEvent>,
    from_shard: mpsc::UnboundedReceiver<Sent>,
}

impl MockPeer {
    pub(crate) fn send(&self, message: &GatewayMessage) {
        let text = message.to_json().unwrap();
        self.to_shard
            .send(TransportEvent::Message(TransportMessage::Text(text)))
            .unwrap();
    }

    pub(crate) fn hello(&self, heartbeat_interval: u64) {
        self.send(&GatewayMessage::hello(&HelloPayload::with_interval(
            heartbeat_interval,
        )));
    }

    pub(crate) fn dispatch(&self, name: &str, sequence: u64, data: Value) {
        self.send(&GatewayMessage::dispatch(name, sequence, data));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.to_shard.send(TransportEvent::Closed(Some(CloseInfo {
            code,
            reason: reason.into(),
        })));
    }

    pub(crate) async fn next(&mut self) -> Sent {
        self.from_shard.recv().await.expect("shard dropped the transport")
    }

    /// Next frame, skipping heartbeats
    pub(crate) async fn next_frame(&mut self) -> GatewayMessage {
        loop {
            match self.next().await {
                Sent::Frame(frame) if frame.op == OpCode::Heartbeat => continue,
                Sent::Frame(frame) => return frame,
                Sent::Close(code) => panic!("expected a frame, got close {code}"),
            }
        }
    }

    pub(crate) async fn expect_op(&mut self, op: OpCode) -> GatewayMessage {
        let frame = self.next_frame().await;
        assert_eq!(frame.op, op, "unexpected frame {frame}");
        frame
    }

    /// Next close code, skipping frames
    pub(crate) async fn expect_close(&mut self) -> u16 {
        loop {
            if let Sent::Close(code) = self.next().await {
                return code;
            }
        }
    }

    /// Everything written so far, without waiting
    pub(crate) fn drain(&mut self) -> Vec<Sent> {
        let mut sent = Vec::new();
        while let Ok(item) = self.from_shard.try_recv() {
            sent.push(item);
        }
        sent
    }
}

/// One shard wired to mocks; admissions are granted as soon as they are requested
pub(crate) struct TestShard {
    pub(crate) handle: ShardHandle,
    pub(crate) peers: mpsc::UnboundedReceiver<MockPeer>,
    pub(crate) lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    pub(crate) frames: mpsc::UnboundedReceiver<(u32, DispatchEvent)>,
}

pub(crate) fn test_config() -> GatewayConfig {
    GatewayConfig::new("ws://gateway.test", "test-token")
}

impl TestShard {
    pub(crate) fn spawn(config: GatewayConfig) -> Self {
        Self::spawn_as(ShardInfo::new(0, 1).unwrap(), config)
    }

    pub(crate) fn spawn_as(info: ShardInfo, config: GatewayConfig) -> Self {
        let (connector, peers) = MockConnector::new();
        Self::spawn_with(info, config, Arc::new(connector), peers)
    }

    /// Wire the shard to any connector; `peers` only yields what that connector hands out
    pub(crate) fn spawn_with_connector(
        config: GatewayConfig,
        connector: impl Connector + 'static,
    ) -> Self {
        let (_no_peers, peers) = mpsc::unbounded_channel();
        Self::spawn_with(ShardInfo::new(0, 1).unwrap(), config, Arc::new(connector), peers)
    }

    fn spawn_with(
        info: ShardInfo,
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        peers: mpsc::UnboundedReceiver<MockPeer>,
    ) -> Self {
        let (dispatcher, frames) = ChannelDispatcher::new();
        let ctx = Arc::new(ShardContext::new(
            config,
            connector,
            Arc::new(JsonCodec),
            Arc::new(dispatcher),
            None,
        ));

        let (pool_tx, mut pool_rx) = mpsc::unbounded_channel();
        let (handle, _task) = shard::spawn(info, ctx, pool_tx);
        let (lifecycle_tx, lifecycle) = mpsc::unbounded_channel();

        let admitter = handle.clone();
        tokio::spawn(async move {
            while let Some(message) = pool_rx.recv().await {
                match message {
                    PoolMessage::RequestStart { .. } => {
                        let _ = admitter.start();
                    }
                    PoolMessage::StartDeclined { .. } => {}
                    PoolMessage::Lifecycle { event, .. } => {
                        let _ = lifecycle_tx.send(event);
                    }
                    PoolMessage::Deregister { ack, .. } => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            handle,
            peers,
            lifecycle,
            frames,
        }
    }

    /// Connect and return the gateway end of the new transport
    pub(crate) async fn connect(&mut self) -> MockPeer {
        self.handle.connect().unwrap();
        self.next_peer().await
    }

    pub(crate) async fn next_peer(&mut self) -> MockPeer {
        self.peers.recv().await.expect("shard task stopped")
    }

    /// Skip lifecycle events until one matches
    pub(crate) async fn until(&mut self, mut matches: impl FnMut(&LifecycleEvent) -> bool) -> LifecycleEvent {
        loop {
            let event = self.lifecycle.recv().await.expect("shard task stopped");
            if matches(&event) {
                return event;
            }
        }
    }

    /// Run a fresh bot session up to READY with no guilds
    pub(crate) async fn ready_session(&mut self, session_id: &str) -> MockPeer {
        let mut peer = self.connect().await;
        peer.hello(45_000);
        peer.expect_op(OpCode::Identify).await;
        peer.dispatch(
            "READY",
            1,
            serde_json::json!({ "session_id": session_id, "guilds": [], "user": { "bot": true } }),
        );
        self.until(|e| *e == LifecycleEvent::Ready).await;
        peer
    }
}
