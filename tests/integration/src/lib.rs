//! Integration test utilities for the shard gateway
//!
//! This crate provides an in-process mock gateway and configuration fixtures for
//! running real WebSocket shards end to end.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
