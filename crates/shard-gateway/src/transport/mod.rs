//! Transport abstraction
//!
//! A shard owns at most one [`Transport`] at a time and gets a fresh one from its
//! [`Connector`] on every (re)connect.

mod websocket;

pub use websocket::{WebSocketConnector, WebSocketTransport};

use async_trait::async_trait;
use thiserror::Error;

/// A message as the transport carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Close frame details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// What `recv` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A data message
    Message(TransportMessage),
    /// The peer closed; `None` when the stream ended without a close frame
    Closed(Option<CloseInfo>),
    /// The connection failed
    Error(TransportError),
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to send: {0}")]
    Send(String),

    #[error("Failed to receive: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,
}

/// Opens transports to the gateway
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// One live duplex connection
///
/// `recv` must be cancel-safe: the shard polls it inside `tokio::select!`.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: TransportMessage) -> Result<(), TransportError>;

    async fn recv(&mut self) -> TransportEvent;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}
