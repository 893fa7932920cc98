//! Payload definitions
//!
//! Outbound payloads this client builds and the inbound payloads the shard state
//! machine inspects. Everything else is passed through to the dispatcher untouched.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use shard_core::{ShardInfo, Snowflake};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,

    /// Gateway servers that handled the connection
    #[serde(default, rename = "_trace", skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl HelloPayload {
    /// Create a Hello payload with the given interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self {
            heartbeat_interval,
            trace: Vec::new(),
        }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Gateway protocol version
    pub v: u8,

    /// Whether the gateway may compress payloads
    pub compress: bool,

    /// Member count above which a guild is sent without offline members
    pub large_threshold: u32,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// `[shard_id, shard_count]`, only sent when sharded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardInfo>,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<StatusUpdatePayload>,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library name
    pub browser: String,

    /// Device name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties for this host and the given client name
    #[must_use]
    pub fn new(client_name: impl Into<String>) -> Self {
        let client_name = client_name.into();
        Self {
            os: std::env::consts::OS.to_string(),
            browser: client_name.clone(),
            device: client_name,
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Online status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

/// What the account is shown as doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,

    /// 0 is playing, 1 is streaming
    #[serde(rename = "type", default)]
    pub kind: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    /// A plain "playing" activity
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: 0,
            url: None,
        }
    }
}

/// A shard's presence as the application sees it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub status: Status,
    pub game: Option<Activity>,
}

/// Payload for op 3 (Status Update)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    /// Unix milliseconds since the account went idle, 0 when not idle
    pub since: u64,

    /// Current activity, `null` clears it
    pub game: Option<Activity>,

    pub status: Status,

    pub afk: bool,
}

impl StatusUpdatePayload {
    /// Build the wire payload for a presence; `now_ms` stamps `since` when idle
    #[must_use]
    pub fn from_presence(presence: &Presence, now_ms: u64) -> Self {
        let idle = presence.status == Status::Idle;
        Self {
            since: if idle { now_ms } else { 0 },
            game: presence.game.clone(),
            status: presence.status,
            afk: idle,
        }
    }
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    /// Guilds to request members for
    pub guild_id: Vec<Snowflake>,

    /// Username prefix, empty for all members
    #[serde(default)]
    pub query: String,

    /// Maximum members to return, 0 for no limit
    #[serde(default)]
    pub limit: u32,
}

impl RequestGuildMembersPayload {
    /// Request every member of the given guilds
    #[must_use]
    pub fn all(guild_id: Vec<Snowflake>) -> Self {
        Self {
            guild_id,
            query: String::new(),
            limit: 0,
        }
    }
}

/// Guild entry in READY and the GUILD_CREATE dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreatePayload {
    pub id: Snowflake,

    #[serde(default)]
    pub unavailable: bool,

    #[serde(default)]
    pub member_count: u64,

    /// Only the length matters to the shard
    #[serde(default)]
    pub members: Vec<IgnoredAny>,
}

impl GuildCreatePayload {
    /// Whether the gateway left members out of this guild
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        (self.members.len() as u64) < self.member_count
    }
}

/// The account that identified
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadyUser {
    #[serde(default)]
    pub bot: bool,
}

/// READY dispatch payload
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,

    #[serde(default)]
    pub guilds: Vec<GuildCreatePayload>,

    #[serde(default)]
    pub user: ReadyUser,

    #[serde(default, rename = "_trace")]
    pub trace: Vec<String>,
}

/// GUILD_SYNC dispatch payload
#[derive(Debug, Clone, Deserialize)]
pub struct GuildSyncPayload {
    pub id: Snowflake,
}

/// GUILD_MEMBERS_CHUNK dispatch payload
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunkPayload {
    pub guild_id: Snowflake,
}
