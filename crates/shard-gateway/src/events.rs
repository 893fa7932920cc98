//! Lifecycle events
//!
//! Shards report structural transitions to the pool; the pool re-publishes them
//! together with fleet-wide transitions.

use crate::error::GatewayError;

/// A shard's lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Transport open requested
    Connecting,
    /// Transport open, waiting for HELLO
    Connected,
    /// READY processed, catch-up data still outstanding
    PreReady,
    /// Fully caught up after READY
    Ready,
    /// Session resumed
    Resumed,
    /// Session invalidated on a live transport; identifying again
    Invalidated,
    /// Transport gone; `Some` when an error caused it
    Disconnected(Option<GatewayError>),
}

impl LifecycleEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::PreReady => "pre_ready",
            Self::Ready => "ready",
            Self::Resumed => "resumed",
            Self::Invalidated => "invalidated",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// What the pool publishes to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A single shard's transition
    Shard { shard_id: u32, event: LifecycleEvent },
    /// Every shard is ready
    Ready,
    /// A ready fleet lost a shard
    NotReady,
    /// Every shard is disconnected
    Disconnected,
}
