//! Shard handle
//!
//! The only way to talk to a running shard. Commands go over an mpsc channel; state
//! is read from a `watch` snapshot the shard republishes after every step.

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Presence, RequestGuildMembersPayload};
use shard_core::ShardInfo;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardStatus {
    #[default]
    Disconnected,
    /// Transport open requested
    Connecting,
    /// Transport open, waiting for HELLO
    Handshaking,
    /// HELLO received, session identified or resumed
    Connected,
}

/// What a disconnect does afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Drop the session, limiters and batches; stay down
    Never,
    /// Keep the session for a later manual `connect`
    Later,
    /// Keep the session and reconnect with backoff (if auto-reconnect is enabled)
    Auto,
}

/// Read-only view of a shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardSnapshot {
    pub status: ShardStatus,
    pub ready: bool,
    pub pre_ready: bool,
    pub session_id: Option<String>,
    pub sequence: u64,
    pub latency: Option<Duration>,
    pub connect_attempts: u32,
    /// Set when the shard stopped after a fatal close
    pub last_error: Option<GatewayError>,
}

#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Admission granted by the pool
    Start,
    Connect,
    Disconnect(ReconnectMode),
    EditStatus(Presence),
    RequestGuildMembers(RequestGuildMembersPayload),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to one shard task
#[derive(Debug, Clone)]
pub struct ShardHandle {
    info: ShardInfo,
    commands: mpsc::UnboundedSender<ShardCommand>,
    snapshot: watch::Receiver<ShardSnapshot>,
}

impl ShardHandle {
    pub(crate) fn new(
        info: ShardInfo,
        commands: mpsc::UnboundedSender<ShardCommand>,
        snapshot: watch::Receiver<ShardSnapshot>,
    ) -> Self {
        Self {
            info,
            commands,
            snapshot,
        }
    }

    #[must_use]
    pub fn info(&self) -> ShardInfo {
        self.info
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.info.id()
    }

    fn send(&self, command: ShardCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::ShardGone(self.info.id()))
    }

    pub(crate) fn start(&self) -> GatewayResult<()> {
        self.send(ShardCommand::Start)
    }

    /// Ask the pool for admission and connect; supersedes a pending reconnect
    pub fn connect(&self) -> GatewayResult<()> {
        self.send(ShardCommand::Connect)
    }

    pub fn disconnect(&self, mode: ReconnectMode) -> GatewayResult<()> {
        self.send(ShardCommand::Disconnect(mode))
    }

    /// Update the presence; dropped while the shard is not connected
    pub fn edit_status(&self, presence: Presence) -> GatewayResult<()> {
        self.send(ShardCommand::EditStatus(presence))
    }

    pub fn request_guild_members(&self, request: RequestGuildMembersPayload) -> GatewayResult<()> {
        self.send(ShardCommand::RequestGuildMembers(request))
    }

    /// Close the transport, stop all timers and leave the pool
    ///
    /// Returns once the shard task has finished all of it.
    pub async fn shutdown(&self) -> GatewayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(ShardCommand::Shutdown(tx))?;
        rx.await.map_err(|_| GatewayError::ShardGone(self.info.id()))
    }

    #[must_use]
    pub fn snapshot(&self) -> ShardSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> ShardStatus {
        self.snapshot.borrow().status
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.snapshot.borrow().ready
    }

    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.snapshot.borrow().latency
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> GatewayResult<ShardSnapshot>
    where
        F: FnMut(&ShardSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| GatewayError::ShardGone(self.info.id()))?;
        Ok(snapshot.clone())
    }
}
