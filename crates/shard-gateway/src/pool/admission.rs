//! Admission gate
//!
//! Serializes shard startups: one shard handshakes at a time, and two admissions are
//! always at least one interval apart.

use crate::events::LifecycleEvent;
use shard_common::AdmissionConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct AdmissionGate {
    interval: Duration,
    margin: Duration,
    /// Earliest point the last admission counts from
    last_admitted: Option<Instant>,
    /// Shards admitted and not yet past their handshake, with their admission time
    handshaking: HashMap<u32, Instant>,
    queue: VecDeque<u32>,
}

impl AdmissionGate {
    pub(crate) fn new(config: &AdmissionConfig) -> Self {
        Self {
            interval: config.interval(),
            margin: config.margin(),
            last_admitted: None,
            handshaking: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Queue a start request and admit whatever is due
    pub(crate) fn request(&mut self, shard_id: u32, now: Instant) -> Option<u32> {
        if !self.queue.contains(&shard_id) && !self.handshaking.contains_key(&shard_id) {
            self.queue.push_back(shard_id);
        }
        self.poll(now)
    }

    /// Admit the queue head if the gate is open
    pub(crate) fn poll(&mut self, now: Instant) -> Option<u32> {
        if !self.handshaking.is_empty() {
            return None;
        }
        if self
            .last_admitted
            .is_some_and(|last| now < last + self.interval)
        {
            return None;
        }

        let shard_id = self.queue.pop_front()?;
        self.handshaking.insert(shard_id, now);
        self.last_admitted = Some(now + self.margin);
        Some(shard_id)
    }

    /// When the queue head becomes admissible by time alone
    ///
    /// `None` while the queue is empty or a shard is handshaking; the end of a handshake
    /// is reported through [`Self::on_lifecycle`] instead.
    pub(crate) fn next_attempt(&self) -> Option<Instant> {
        if self.queue.is_empty() || !self.handshaking.is_empty() {
            return None;
        }
        self.last_admitted.map(|last| last + self.interval)
    }

    pub(crate) fn on_lifecycle(&mut self, shard_id: u32, event: &LifecycleEvent, now: Instant) {
        match event {
            LifecycleEvent::PreReady | LifecycleEvent::Resumed => {
                if let Some(admitted) = self.handshaking.remove(&shard_id) {
                    self.last_admitted = Some(now.max(admitted));
                }
            }
            LifecycleEvent::Disconnected(_) => {
                self.handshaking.remove(&shard_id);
            }
            LifecycleEvent::Connecting
            | LifecycleEvent::Connected
            | LifecycleEvent::Ready
            | LifecycleEvent::Invalidated => {}
        }
    }

    /// The shard turned its admission down
    pub(crate) fn declined(&mut self, shard_id: u32) {
        self.handshaking.remove(&shard_id);
    }

    /// Forget a shard entirely
    pub(crate) fn remove(&mut self, shard_id: u32) {
        self.queue.retain(|id| *id != shard_id);
        self.handshaking.remove(&shard_id);
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}
