//! # shard-core
//!
//! Value objects shared by the gateway client: snowflake ids and shard identity/routing.
//! This crate has no runtime or I/O dependencies.

pub mod value_objects;

pub use value_objects::{ShardInfo, ShardInfoError, Snowflake, SnowflakeParseError};
