//! Fleet readiness

use crate::events::{FleetEvent, LifecycleEvent};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Down,
    Up,
    Ready,
}

/// Aggregates shard transitions into fleet transitions
#[derive(Debug)]
pub(crate) struct FleetReadiness {
    shards: HashMap<u32, Phase>,
    ready: bool,
    all_down: bool,
}

impl FleetReadiness {
    pub(crate) fn new(shard_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            shards: shard_ids.into_iter().map(|id| (id, Phase::Down)).collect(),
            ready: false,
            all_down: true,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    /// Apply one shard transition; returns the fleet transitions it caused
    pub(crate) fn update(&mut self, shard_id: u32, event: &LifecycleEvent) -> Vec<FleetEvent> {
        let phase = match event {
            LifecycleEvent::Connecting
            | LifecycleEvent::Connected
            | LifecycleEvent::PreReady
            | LifecycleEvent::Invalidated => Phase::Up,
            LifecycleEvent::Ready | LifecycleEvent::Resumed => Phase::Ready,
            LifecycleEvent::Disconnected(_) => Phase::Down,
        };
        let Some(current) = self.shards.get_mut(&shard_id) else {
            return Vec::new();
        };
        *current = phase;
        self.recompute()
    }

    /// Stop counting a shard
    pub(crate) fn remove(&mut self, shard_id: u32) -> Vec<FleetEvent> {
        if self.shards.remove(&shard_id).is_none() {
            return Vec::new();
        }
        self.recompute()
    }

    fn recompute(&mut self) -> Vec<FleetEvent> {
        let mut events = Vec::new();

        let ready = !self.shards.is_empty() && self.shards.values().all(|p| *p == Phase::Ready);
        if ready != self.ready {
            self.ready = ready;
            events.push(if ready {
                FleetEvent::Ready
            } else {
                FleetEvent::NotReady
            });
        }

        let all_down = self.shards.values().all(|p| *p == Phase::Down);
        if all_down && !self.all_down {
            events.push(FleetEvent::Disconnected);
        }
        self.all_down = all_down;

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn test_ready_once_all_shards_are_ready() {
        let mut fleet = FleetReadiness::new([0, 1]);
        assert!(fleet.update(0, &LifecycleEvent::Connecting).is_empty());
        assert!(fleet.update(0, &LifecycleEvent::Ready).is_empty());
        assert!(fleet.update(1, &LifecycleEvent::PreReady).is_empty());
        assert_eq!(fleet.update(1, &LifecycleEvent::Ready), vec![FleetEvent::Ready]);
        assert!(fleet.is_ready());

        // Already ready: no second event
        assert!(fleet.update(1, &LifecycleEvent::Resumed).is_empty());
    }

    #[test]
    fn test_losing_a_shard() {
        let mut fleet = FleetReadiness::new([0, 1]);
        fleet.update(0, &LifecycleEvent::Ready);
        fleet.update(1, &LifecycleEvent::Ready);

        let events = fleet.update(
            0,
            &LifecycleEvent::Disconnected(Some(GatewayError::HeartbeatTimeout)),
        );
        assert_eq!(events, vec![FleetEvent::NotReady]);
        assert!(!fleet.is_ready());

        assert_eq!(
            fleet.update(1, &LifecycleEvent::Disconnected(None)),
            vec![FleetEvent::Disconnected]
        );
        assert!(fleet.update(1, &LifecycleEvent::Disconnected(None)).is_empty());
    }

    #[test]
    fn test_invalidated_session_is_not_ready() {
        let mut fleet = FleetReadiness::new([0]);
        assert_eq!(fleet.update(0, &LifecycleEvent::Ready), vec![FleetEvent::Ready]);
        assert_eq!(
            fleet.update(0, &LifecycleEvent::Invalidated),
            vec![FleetEvent::NotReady]
        );
        assert!(!fleet.is_ready());
    }

    #[test]
    fn test_starts_down_without_event() {
        let mut fleet = FleetReadiness::new([0]);
        assert!(fleet.update(0, &LifecycleEvent::Disconnected(None)).is_empty());
    }

    #[test]
    fn test_remove_and_unknown_shards() {
        let mut fleet = FleetReadiness::new([0, 1]);
        assert!(fleet.update(7, &LifecycleEvent::Ready).is_empty());

        fleet.update(0, &LifecycleEvent::Ready);
        assert_eq!(fleet.remove(1), vec![FleetEvent::Ready]);
        assert_eq!(
            fleet.remove(0),
            vec![FleetEvent::NotReady, FleetEvent::Disconnected]
        );
        assert!(fleet.remove(0).is_empty());
    }
}
