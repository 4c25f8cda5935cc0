// src/pipeline/event_bus.rs
//
// Junction transitions published once per tick. The loop drains and logs
// them instead of diffing state inline.

use super::broadcaster::Snapshot;
use crate::types::JunctionSignal;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum JunctionEvent {
    SignalChanged {
        tick: u64,
        from: JunctionSignal,
        to: JunctionSignal,
    },
    RoadAlertChanged {
        tick: u64,
        road: String,
        alert: bool,
    },
    RoadsStale {
        tick: u64,
        roads: Vec<String>,
    },
}

pub struct EventBus {
    events: VecDeque<JunctionEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: JunctionEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<JunctionEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

/// Remembers the previous tick and publishes what changed.
#[derive(Default)]
pub struct TransitionWatcher {
    last_signal: Option<JunctionSignal>,
    last_alerts: HashMap<String, bool>,
}

impl TransitionWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, snapshot: &Snapshot, signal: &JunctionSignal, bus: &mut EventBus) {
        for status in &snapshot.statuses {
            let previous = self
                .last_alerts
                .insert(status.road.clone(), status.alert)
                .unwrap_or(false);
            if previous != status.alert {
                bus.publish(JunctionEvent::RoadAlertChanged {
                    tick: snapshot.tick,
                    road: status.road.clone(),
                    alert: status.alert,
                });
            }
        }

        if !snapshot.stale_roads.is_empty() {
            bus.publish(JunctionEvent::RoadsStale {
                tick: snapshot.tick,
                roads: snapshot.stale_roads.clone(),
            });
        }

        let previous = self
            .last_signal
            .replace(signal.clone())
            .unwrap_or_else(JunctionSignal::green);
        if previous != *signal {
            bus.publish(JunctionEvent::SignalChanged {
                tick: snapshot.tick,
                from: previous,
                to: signal.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoadStatus;

    fn snapshot(tick: u64, east_alert: bool) -> Snapshot {
        Snapshot {
            tick,
            statuses: vec![RoadStatus {
                alert: east_alert,
                vehicle_count: east_alert as u32,
                ..RoadStatus::idle("EAST")
            }],
            stale_roads: Vec::new(),
        }
    }

    #[test]
    fn test_publishes_only_changes() {
        let mut bus = EventBus::new(16);
        let mut watcher = TransitionWatcher::new();

        watcher.observe(&snapshot(1, false), &JunctionSignal::green(), &mut bus);
        assert_eq!(bus.pending_count(), 0);

        watcher.observe(&snapshot(2, true), &JunctionSignal::yellow("EAST"), &mut bus);
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            JunctionEvent::RoadAlertChanged { road, alert: true, .. } if road == "EAST"
        ));
        assert!(matches!(
            &events[1],
            JunctionEvent::SignalChanged { tick: 2, to, .. } if to.active_direction.as_deref() == Some("EAST")
        ));

        watcher.observe(&snapshot(3, true), &JunctionSignal::yellow("EAST"), &mut bus);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_bus_drops_oldest_when_full() {
        let mut bus = EventBus::new(2);
        for tick in 1..=3 {
            bus.publish(JunctionEvent::RoadsStale {
                tick,
                roads: vec!["WEST".to_string()],
            });
        }
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], JunctionEvent::RoadsStale { tick: 2, .. }));
    }
}
