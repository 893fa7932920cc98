//! Value objects - immutable types that represent domain concepts

mod shard_info;
mod snowflake;

pub use shard_info::{ShardInfo, ShardInfoError};
pub use snowflake::{Snowflake, SnowflakeParseError};
