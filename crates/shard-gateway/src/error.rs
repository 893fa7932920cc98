//! Gateway error types

use crate::codec::CodecError;
use crate::protocol::CloseCode;
use crate::transport::TransportError;
use shard_core::ShardInfoError;
use thiserror::Error;

/// Errors a shard surfaces to its owner
///
/// Cloned into every `Disconnected` lifecycle event, so variants carry strings
/// rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The transport failed to open, write or read
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The gateway closed the connection with a code other than 1000
    #[error("Gateway closed the connection: {code}: {reason}")]
    Closed { code: u16, reason: String },

    /// The gateway closed with a code after which the shard stops
    #[error("Fatal close {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    /// The session can no longer be resumed
    #[error("Invalid session")]
    SessionInvalidated,

    /// The gateway rejected the sequence number on resume
    #[error("Invalid sequence number: {0}")]
    InvalidSequence(u64),

    /// A heartbeat tick found the previous heartbeat unacknowledged
    #[error("Server didn't acknowledge previous heartbeat, possible lost connection")]
    HeartbeatTimeout,

    /// HELLO did not arrive in time
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// The gateway asked the shard to reconnect
    #[error("Gateway requested a reconnect")]
    ReconnectRequested,

    /// A connect was requested while a transport is live
    #[error("Existing connection detected")]
    AlreadyConnected,

    /// The shard task is no longer running
    #[error("Shard {0} is gone")]
    ShardGone(u32),

    /// The configured shard range does not fit the shard count
    #[error("Invalid shard: {0}")]
    InvalidShard(#[from] ShardInfoError),

    /// The pool configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How an error affects the shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection lost; reconnect evaluation follows
    Transport,
    /// Bad frame; logged, connection kept
    Protocol,
    /// Terminal; no further reconnects
    Fatal,
    /// Session dropped and re-identified locally
    Session,
    /// Caller misuse of a shard handle
    Usage,
}

impl GatewayError {
    /// Build the error for a close frame
    #[must_use]
    pub fn from_close(code: u16, reason: &str) -> Self {
        let reason = if reason.is_empty() {
            CloseCode::from_u16(code)
                .map(|c| c.description().to_string())
                .unwrap_or_default()
        } else {
            reason.to_string()
        };
        Self::Closed { code, reason }
    }

    /// Classify this error
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_)
            | Self::Closed { .. }
            | Self::HeartbeatTimeout
            | Self::ConnectionTimeout
            | Self::ReconnectRequested => ErrorCategory::Transport,
            Self::Codec(_) => ErrorCategory::Protocol,
            Self::FatalClose { .. } => ErrorCategory::Fatal,
            Self::SessionInvalidated | Self::InvalidSequence(_) => ErrorCategory::Session,
            Self::AlreadyConnected
            | Self::ShardGone(_)
            | Self::InvalidShard(_)
            | Self::InvalidConfig(_) => ErrorCategory::Usage,
        }
    }

    /// Whether the shard stops reconnecting after this error
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
