//! Gateway frame format
//!
//! Every frame on the wire is `{op, d, s, t}`; `s` and `t` only appear on dispatches.

use super::{
    HelloPayload, IdentifyPayload, OpCode, RequestGuildMembersPayload, ResumePayload,
    StatusUpdatePayload,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shard_core::Snowflake;

/// Gateway frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event name (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Frame payload
    #[serde(default)]
    pub d: Option<Value>,
}

/// An application event taken out of a dispatch frame
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub name: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl DispatchEvent {
    /// Decode the event data into a typed payload
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl GatewayMessage {
    fn with_data(op: OpCode, data: Value) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: Some(data),
        }
    }

    // === Client Messages ===

    /// Create a Heartbeat message (op=1); `null` until the first dispatch arrived
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::with_data(
            OpCode::Heartbeat,
            last_sequence.map_or(Value::Null, |s| Value::Number(s.into())),
        )
    }

    /// Create an Identify message (op=2)
    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::with_data(
            OpCode::Identify,
            serde_json::to_value(payload).unwrap_or_default(),
        )
    }

    /// Create a Status Update message (op=3)
    #[must_use]
    pub fn status_update(payload: &StatusUpdatePayload) -> Self {
        Self::with_data(
            OpCode::StatusUpdate,
            serde_json::to_value(payload).unwrap_or_default(),
        )
    }

    /// Create a Resume message (op=6)
    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::with_data(OpCode::Resume, serde_json::to_value(payload).unwrap_or_default())
    }

    /// Create a Request Guild Members message (op=8)
    #[must_use]
    pub fn request_guild_members(payload: &RequestGuildMembersPayload) -> Self {
        Self::with_data(
            OpCode::RequestGuildMembers,
            serde_json::to_value(payload).unwrap_or_default(),
        )
    }

    /// Create a Sync Guild message (op=12)
    #[must_use]
    pub fn sync_guilds(guild_ids: &[Snowflake]) -> Self {
        Self::with_data(
            OpCode::SyncGuild,
            serde_json::to_value(guild_ids).unwrap_or_default(),
        )
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Create a Hello message (op=10)
    #[must_use]
    pub fn hello(payload: &HelloPayload) -> Self {
        Self::with_data(OpCode::Hello, serde_json::to_value(payload).unwrap_or_default())
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self {
            op: OpCode::HeartbeatAck,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Create a Reconnect message (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self {
            op: OpCode::Reconnect,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Create an Invalid Session message (op=9)
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::with_data(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Parsing Server Messages ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| HelloPayload::deserialize(d).ok())
    }

    /// Split a dispatch frame into its event (op=0)
    pub fn into_dispatch(self) -> Option<DispatchEvent> {
        if self.op != OpCode::Dispatch {
            return None;
        }
        Some(DispatchEvent {
            name: self.t?,
            sequence: self.s,
            data: self.d.unwrap_or(Value::Null),
        })
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
