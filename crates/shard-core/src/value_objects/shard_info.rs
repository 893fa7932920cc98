//! Shard identity
//!
//! A shard is one partition of the guild space; guilds are routed by the timestamp
//! bits of their id.

use super::Snowflake;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shard index and total shard count, as sent in the identify payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[u32; 2]", try_from = "[u32; 2]")]
pub struct ShardInfo {
    id: u32,
    count: u32,
}

impl ShardInfo {
    /// Create a shard identity, validating that `id < count`
    pub fn new(id: u32, count: u32) -> Result<Self, ShardInfoError> {
        if count == 0 {
            return Err(ShardInfoError::ZeroCount);
        }
        if id >= count {
            return Err(ShardInfoError::OutOfRange { id, count });
        }
        Ok(Self { id, count })
    }

    /// The shard index
    #[inline]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Total number of shards
    #[inline]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Whether this deployment runs more than one shard
    #[inline]
    pub const fn is_sharded(&self) -> bool {
        self.count > 1
    }

    /// Which shard a guild belongs to for a given shard count
    #[must_use]
    pub fn shard_for_guild(guild_id: Snowflake, count: u32) -> u32 {
        (guild_id.relative_timestamp() % u64::from(count.max(1))) as u32
    }

    /// Whether the given guild is routed to this shard
    #[must_use]
    pub fn owns_guild(&self, guild_id: Snowflake) -> bool {
        Self::shard_for_guild(guild_id, self.count) == self.id
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.id, self.count)
    }
}

impl From<ShardInfo> for [u32; 2] {
    fn from(info: ShardInfo) -> Self {
        [info.id, info.count]
    }
}

impl TryFrom<[u32; 2]> for ShardInfo {
    type Error = ShardInfoError;

    fn try_from([id, count]: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(id, count)
    }
}

/// Error when building a [`ShardInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShardInfoError {
    #[error("shard count must be at least 1")]
    ZeroCount,

    #[error("shard id {id} is out of range for {count} shards")]
    OutOfRange { id: u32, count: u32 },
}
