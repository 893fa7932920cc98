//! Application event dispatch
//!
//! The shard hands every dispatch frame it receives to a [`Dispatcher`]. What an event
//! means for the application's cache is entirely the dispatcher's business.

use crate::protocol::DispatchEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receives application events from every shard
pub trait Dispatcher: Send + Sync {
    fn on_frame(&self, event: &DispatchEvent, shard_id: u32);
}

type Handler = Box<dyn Fn(&DispatchEvent, u32) + Send + Sync>;

/// Lookup table from event name to handler
///
/// ```
/// use shard_gateway::dispatcher::EventRouter;
///
/// let router = EventRouter::new()
///     .on("MESSAGE_CREATE", |event, shard_id| {
///         tracing::info!(shard_id, seq = ?event.sequence, "message");
///     })
///     .fallback(|_, _| {});
/// assert!(router.handles("MESSAGE_CREATE"));
/// ```
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one event name, replacing any earlier one
    #[must_use]
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&DispatchEvent, u32) + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    /// Handler for events without a registered handler
    #[must_use]
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DispatchEvent, u32) + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Dispatcher for EventRouter {
    fn on_frame(&self, event: &DispatchEvent, shard_id: u32) {
        match self.handlers.get(&event.name).or(self.fallback.as_ref()) {
            Some(handler) => handler(event, shard_id),
            None => tracing::trace!(shard_id, event = %event.name, "Unhandled event"),
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Forwards every event into a channel as `(shard_id, event)`
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<(u32, DispatchEvent)>,
}

impl ChannelDispatcher {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(u32, DispatchEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn on_frame(&self, event: &DispatchEvent, shard_id: u32) {
        if self.tx.send((shard_id, event.clone())).is_err() {
            tracing::trace!(shard_id, event = %event.name, "Dispatch receiver dropped");
        }
    }
}
