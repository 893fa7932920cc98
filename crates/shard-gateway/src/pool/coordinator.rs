//! Pool coordinator
//!
//! The single task that owns admission and readiness. Shards reach it only through
//! [`PoolMessage`]s.

use super::admission::AdmissionGate;
use super::readiness::FleetReadiness;
use crate::events::{FleetEvent, LifecycleEvent};
use crate::shard::ShardHandle;
use dashmap::DashMap;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum PoolMessage {
    /// The shard wants to open a connection
    RequestStart { shard_id: u32 },
    /// The shard turned an admission down (it was no longer waiting)
    StartDeclined { shard_id: u32 },
    Lifecycle {
        shard_id: u32,
        event: LifecycleEvent,
    },
    /// The shard shut down; `ack` fires once it no longer counts toward readiness
    Deregister {
        shard_id: u32,
        ack: oneshot::Sender<()>,
    },
}

pub(crate) struct Coordinator {
    gate: AdmissionGate,
    readiness: FleetReadiness,
    shards: Arc<DashMap<u32, ShardHandle>>,
    messages: mpsc::UnboundedReceiver<PoolMessage>,
    events: mpsc::UnboundedSender<FleetEvent>,
    ready: Arc<AtomicBool>,
}

impl Coordinator {
    pub(crate) fn new(
        gate: AdmissionGate,
        readiness: FleetReadiness,
        shards: Arc<DashMap<u32, ShardHandle>>,
        messages: mpsc::UnboundedReceiver<PoolMessage>,
        events: mpsc::UnboundedSender<FleetEvent>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            gate,
            readiness,
            shards,
            messages,
            events,
            ready,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let retry = self.gate.next_attempt();
            tokio::select! {
                () = sleep_until(retry) => self.admit(Instant::now()),
                message = self.messages.recv() => match message {
                    Some(message) => self.handle(message, Instant::now()),
                    None => break,
                },
            }
        }
        debug!("Pool coordinator stopped");
    }

    fn handle(&mut self, message: PoolMessage, now: Instant) {
        match message {
            PoolMessage::RequestStart { shard_id } => {
                debug!(shard_id, queued = self.gate.queued(), "Start requested");
                if let Some(admitted) = self.gate.request(shard_id, now) {
                    self.start(admitted);
                }
            }
            PoolMessage::StartDeclined { shard_id } => {
                self.gate.declined(shard_id);
                self.admit(now);
            }
            PoolMessage::Lifecycle { shard_id, event } => {
                self.gate.on_lifecycle(shard_id, &event, now);
                let fleet = self.readiness.update(shard_id, &event);
                self.publish(FleetEvent::Shard { shard_id, event });
                for event in fleet {
                    self.publish(event);
                }
                self.admit(now);
            }
            PoolMessage::Deregister { shard_id, ack } => {
                self.gate.remove(shard_id);
                self.shards.remove(&shard_id);
                for event in self.readiness.remove(shard_id) {
                    self.publish(event);
                }
                debug!(shard_id, "Shard deregistered");
                let _ = ack.send(());
                self.admit(now);
            }
        }
    }

    fn admit(&mut self, now: Instant) {
        if let Some(shard_id) = self.gate.poll(now) {
            self.start(shard_id);
        }
    }

    fn start(&mut self, shard_id: u32) {
        let started = self
            .shards
            .get(&shard_id)
            .is_some_and(|handle| handle.start().is_ok());
        if started {
            info!(shard_id, "Admitted shard");
        } else {
            warn!(shard_id, "Admitted shard is gone");
            self.gate.remove(shard_id);
        }
    }

    fn publish(&self, event: FleetEvent) {
        match &event {
            FleetEvent::Ready => info!("All shards ready"),
            FleetEvent::NotReady => warn!("Fleet no longer ready"),
            FleetEvent::Disconnected => warn!("All shards disconnected"),
            FleetEvent::Shard { .. } => {}
        }
        self.ready.store(self.readiness.is_ready(), Ordering::Release);
        // The application may not listen for fleet events
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
