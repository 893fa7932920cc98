//! Heartbeat bookkeeping

use std::time::Duration;
use tokio::time::Instant;

/// Ack tracking between two heartbeat ticks
#[derive(Debug, Clone)]
pub(crate) struct HeartbeatState {
    acked: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatState {
    /// Starts acked: nothing has been sent yet
    pub(crate) fn new() -> Self {
        Self {
            acked: true,
            last_sent: None,
            latency: None,
        }
    }

    pub(crate) fn is_acked(&self) -> bool {
        self.acked
    }

    pub(crate) fn sent(&mut self, now: Instant) {
        self.acked = false;
        self.last_sent = Some(now);
    }

    pub(crate) fn ack(&mut self, now: Instant) {
        self.acked = true;
        if let Some(sent) = self.last_sent {
            self.latency = Some(now.saturating_duration_since(sent));
        }
    }

    /// Round trip of the last acked heartbeat
    pub(crate) fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Forget the connection's heartbeats, keeping the last measured latency
    pub(crate) fn reset(&mut self) {
        self.acked = true;
        self.last_sent = None;
    }
}
