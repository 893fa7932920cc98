//! Frame encoding
//!
//! The shard never touches bytes directly; it hands frames to a [`Codec`].

use crate::protocol::GatewayMessage;
use crate::transport::TransportMessage;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

/// Converts gateway frames to and from transport messages
pub trait Codec: Send + Sync {
    /// Query-string value for `encoding=`
    fn name(&self) -> &'static str;

    fn encode(&self, message: &GatewayMessage) -> Result<TransportMessage, CodecError>;

    fn decode(&self, message: &TransportMessage) -> Result<GatewayMessage, CodecError>;
}

/// Plain JSON text frames
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &GatewayMessage) -> Result<TransportMessage, CodecError> {
        message
            .to_json()
            .map(TransportMessage::Text)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, message: &TransportMessage) -> Result<GatewayMessage, CodecError> {
        let result = match message {
            TransportMessage::Text(text) => GatewayMessage::from_json(text),
            TransportMessage::Binary(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| CodecError::Decode(e.to_string()))
    }
}
