//! # shard-gateway
//!
//! Sharded gateway client: one connection state machine per shard, a pool that
//! serializes their startups and tracks fleet readiness, token-bucket throttling of
//! outbound frames and batching of bulk guild requests.

pub mod batch;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod pool;
pub mod protocol;
pub mod ratelimit;
pub mod shard;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{Batch, BatchKind, BulkRequestBatcher};
pub use codec::{Codec, CodecError, JsonCodec};
pub use dispatcher::{ChannelDispatcher, Dispatcher, EventRouter};
pub use error::{ErrorCategory, GatewayError, GatewayResult};
pub use events::{FleetEvent, LifecycleEvent};
pub use pool::{ConnectionPool, ConnectionPoolBuilder};
pub use ratelimit::RateLimiter;
pub use shard::{ReconnectMode, ShardHandle, ShardSnapshot, ShardStatus};
pub use transport::{Connector, Transport, WebSocketConnector};
