//! Connection pool
//!
//! Owns one shard per configured index, serializes their startups through an
//! [`admission`] gate and aggregates their lifecycles into fleet readiness.

mod admission;
mod coordinator;
mod readiness;

pub(crate) use coordinator::PoolMessage;

use crate::codec::{Codec, JsonCodec};
use crate::dispatcher::{Dispatcher, EventRouter};
use crate::error::{GatewayError, GatewayResult};
use crate::events::FleetEvent;
use crate::protocol::Presence;
use crate::shard::{self, ShardContext, ShardHandle};
use crate::transport::{Connector, WebSocketConnector};
use admission::AdmissionGate;
use coordinator::Coordinator;
use dashmap::DashMap;
use parking_lot::Mutex;
use readiness::FleetReadiness;
use shard_common::GatewayConfig;
use shard_core::{ShardInfo, Snowflake};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Builder for [`ConnectionPool`]
pub struct ConnectionPoolBuilder {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    dispatcher: Arc<dyn Dispatcher>,
    presence: Option<Presence>,
}

impl ConnectionPoolBuilder {
    /// Transport factory; defaults to [`WebSocketConnector`]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Frame codec; defaults to [`JsonCodec`]
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Receiver of every dispatch frame; defaults to an empty [`EventRouter`]
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Presence sent with IDENTIFY
    pub fn presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Spawn the coordinator and one idle task per shard
    ///
    /// Must be called inside a tokio runtime. Nothing connects until
    /// [`ConnectionPool::connect_all`] or [`ShardHandle::connect`].
    pub fn build(self) -> GatewayResult<(ConnectionPool, mpsc::UnboundedReceiver<FleetEvent>)> {
        self.config
            .validate()
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;

        let count = self.config.sharding.shard_count;
        let infos = self
            .config
            .sharding
            .shard_ids()
            .map(|id| ShardInfo::new(id, count))
            .collect::<Result<Vec<_>, _>>()?;

        let gate = AdmissionGate::new(&self.config.admission);
        let ctx = Arc::new(ShardContext::new(
            self.config,
            self.connector,
            self.codec,
            self.dispatcher,
            self.presence,
        ));

        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shards = Arc::new(DashMap::new());
        let mut tasks = Vec::with_capacity(infos.len());

        for info in &infos {
            let (handle, task) = shard::spawn(*info, ctx.clone(), pool_tx.clone());
            shards.insert(info.id(), handle);
            tasks.push(task);
        }

        let ready = Arc::new(AtomicBool::new(false));
        let coordinator = Coordinator::new(
            gate,
            FleetReadiness::new(infos.iter().map(ShardInfo::id)),
            shards.clone(),
            pool_rx,
            events_tx,
            ready.clone(),
        );
        let coordinator = tokio::spawn(coordinator.run());

        tracing::info!(
            shards = infos.len(),
            shard_count = count,
            "Connection pool created"
        );

        let pool = ConnectionPool {
            shard_count: count,
            shards,
            tasks: Mutex::new(tasks),
            ready,
            coordinator,
        };
        Ok((pool, events_rx))
    }
}

/// The shards of one bot, started one at a time
pub struct ConnectionPool {
    shard_count: u32,
    shards: Arc<DashMap<u32, ShardHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ready: Arc<AtomicBool>,
    coordinator: JoinHandle<()>,
}

impl ConnectionPool {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder {
            config,
            connector: Arc::new(WebSocketConnector),
            codec: Arc::new(JsonCodec),
            dispatcher: Arc::new(EventRouter::new()),
            presence: None,
        }
    }

    /// Request a connection for every shard, in index order
    pub fn connect_all(&self) -> GatewayResult<()> {
        for id in self.shard_ids() {
            if let Some(handle) = self.shard(id) {
                handle.connect()?;
            }
        }
        Ok(())
    }

    /// Shard by index
    pub fn shard(&self, id: u32) -> Option<ShardHandle> {
        self.shards.get(&id).map(|r| r.clone())
    }

    /// The shard a guild is routed to, if this pool runs it
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> Option<ShardHandle> {
        self.shard(ShardInfo::shard_for_guild(guild_id, self.shard_count))
    }

    /// Indices of the shards still registered, ascending
    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Whether every registered shard is ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Update the presence of every shard
    pub fn edit_status(&self, presence: &Presence) -> GatewayResult<()> {
        for id in self.shard_ids() {
            if let Some(handle) = self.shard(id) {
                handle.edit_status(presence.clone())?;
            }
        }
        Ok(())
    }

    /// Shut every shard down and wait for their tasks to finish
    pub async fn shutdown(&self) {
        for id in self.shard_ids() {
            if let Some(handle) = self.shard(id) {
                if let Err(error) = handle.shutdown().await {
                    tracing::debug!(shard_id = id, error = %error, "Shard already stopped");
                }
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "Shard task failed");
            }
        }
        tracing::info!("Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        // Releases the coordinator's shard handles; idle shards then stop on their own
        self.coordinator.abort();
    }
}
