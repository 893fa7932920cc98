//! Shards
//!
//! A shard is one gateway connection. Each runs as its own task (see [`runner`]) and is
//! driven through a [`ShardHandle`].

mod backoff;
mod handle;
mod heartbeat;
mod runner;

pub use handle::{ReconnectMode, ShardHandle, ShardSnapshot, ShardStatus};

use crate::codec::Codec;
use crate::dispatcher::Dispatcher;
use crate::pool::PoolMessage;
use crate::protocol::{ClosePolicy, Presence};
use crate::transport::Connector;
use runner::Shard;
use shard_common::GatewayConfig;
use shard_core::ShardInfo;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Everything the shards of one pool share
pub(crate) struct ShardContext {
    pub(crate) config: GatewayConfig,
    pub(crate) close_policy: ClosePolicy,
    pub(crate) disabled_events: HashSet<String>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    /// Sent with IDENTIFY until a shard's status is edited
    pub(crate) presence: Option<Presence>,
}

impl ShardContext {
    pub(crate) fn new(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn Codec>,
        dispatcher: Arc<dyn Dispatcher>,
        presence: Option<Presence>,
    ) -> Self {
        let close_policy = ClosePolicy::from(&config.close_policy);
        let disabled_events = config.disabled_events.iter().cloned().collect();
        Self {
            config,
            close_policy,
            disabled_events,
            connector,
            codec,
            dispatcher,
            presence,
        }
    }
}

/// Spawn the task for one shard; it stays idle until told to connect
pub(crate) fn spawn(
    info: ShardInfo,
    ctx: Arc<ShardContext>,
    pool: mpsc::UnboundedSender<PoolMessage>,
) -> (ShardHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(ShardSnapshot::default());

    let shard = Shard::new(info, ctx, pool, commands_rx, snapshot_tx);
    let span = tracing::info_span!("shard", id = info.id(), count = info.count());
    let task = tokio::spawn(shard.run().instrument(span));

    (ShardHandle::new(info, commands_tx, snapshot_rx), task)
}
