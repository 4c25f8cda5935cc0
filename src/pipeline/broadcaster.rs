// src/pipeline/broadcaster.rs
//
// The only synchronization point between road workers. Each tick the
// broadcaster announces a tick number, then waits (bounded) for every live
// road to answer with that tick's status. Roads that miss the deadline keep
// their last known status for this tick, so one stalled camera never blocks
// the junction. A carried-over alert is dropped once it is older than the
// alert hold. Offline roads are never waited for and report idle.

use crate::clock::Clock;
use crate::types::RoadStatus;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum RoadMessage {
    Status { tick: u64, status: RoadStatus },
    /// The road's frame source ran dry; it keeps answering with empty frames.
    Exhausted { road: String },
    /// The road stopped for good (source lost, worker failure).
    Offline { road: String, reason: String },
}

/// Tick-consistent view of every road, in canonical road order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tick: u64,
    pub statuses: Vec<RoadStatus>,
    /// Roads whose status was carried over from an earlier tick
    pub stale_roads: Vec<String>,
}

struct LastStatus {
    tick: u64,
    received: Instant,
    status: RoadStatus,
}

pub struct StatusBroadcaster {
    roads: Vec<String>,
    latest: HashMap<String, LastStatus>,
    offline: HashSet<String>,
    exhausted: HashSet<String>,
    tick: u64,
    tick_tx: watch::Sender<u64>,
    status_tx: mpsc::Sender<RoadMessage>,
    status_rx: mpsc::Receiver<RoadMessage>,
    timeout: Duration,
    alert_hold: Duration,
    clock: Arc<dyn Clock>,
}

impl StatusBroadcaster {
    /// `roads` must be in canonical order.
    pub fn new(
        roads: Vec<String>,
        timeout: Duration,
        alert_hold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tick_tx, _) = watch::channel(0);
        let (status_tx, status_rx) = mpsc::channel((roads.len() * 4).max(16));
        Self {
            roads,
            latest: HashMap::new(),
            offline: HashSet::new(),
            exhausted: HashSet::new(),
            tick: 0,
            tick_tx,
            status_tx,
            status_rx,
            timeout,
            alert_hold,
            clock,
        }
    }

    /// Channel ends a road worker needs: tick announcements in, statuses out.
    pub fn subscribe(&self) -> (watch::Receiver<u64>, mpsc::Sender<RoadMessage>) {
        (self.tick_tx.subscribe(), self.status_tx.clone())
    }

    pub fn mark_offline(&mut self, road: &str, reason: &str) {
        if self.offline.insert(road.to_string()) {
            error!("❌ [{}] Road offline: {}", road, reason);
        }
        let idle = LastStatus {
            tick: self.tick,
            received: self.clock.now(),
            status: RoadStatus::idle(road),
        };
        self.latest.insert(road.to_string(), idle);
    }

    pub fn is_offline(&self, road: &str) -> bool {
        self.offline.contains(road)
    }

    /// True once no road can produce new frames.
    pub fn all_finished(&self) -> bool {
        self.roads
            .iter()
            .all(|r| self.offline.contains(r) || self.exhausted.contains(r))
    }

    /// Start the next tick and collect one status per live road.
    pub async fn next_snapshot(&mut self) -> Snapshot {
        self.tick += 1;
        let tick = self.tick;
        self.tick_tx.send_replace(tick);

        let mut pending: HashSet<String> = self
            .roads
            .iter()
            .filter(|r| !self.offline.contains(*r))
            .cloned()
            .collect();

        let deadline = tokio::time::Instant::now() + self.timeout;
        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, self.status_rx.recv()).await {
                Ok(Some(msg)) => self.handle(msg, tick, &mut pending),
                // Unreachable while we hold a sender, but never spin on it
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let stale_roads: Vec<String> = self
            .roads
            .iter()
            .filter(|r| pending.contains(*r))
            .cloned()
            .collect();
        if !stale_roads.is_empty() {
            debug!(
                "Tick {}: no fresh status from {:?}, reusing previous",
                tick, stale_roads
            );
        }

        let now = self.clock.now();
        let statuses = self
            .roads
            .iter()
            .map(|r| match self.latest.get(r) {
                None => RoadStatus::idle(r.as_str()),
                Some(last) => {
                    let mut status = last.status.clone();
                    let age = now.saturating_duration_since(last.received);
                    if status.alert && pending.contains(r) && age > self.alert_hold {
                        debug!(
                            "[{}] silent for {:.1}s, dropping held alert",
                            r,
                            age.as_secs_f32()
                        );
                        status.alert = false;
                    }
                    status
                }
            })
            .collect();

        Snapshot {
            tick,
            statuses,
            stale_roads,
        }
    }

    fn handle(&mut self, msg: RoadMessage, tick: u64, pending: &mut HashSet<String>) {
        match msg {
            RoadMessage::Status {
                tick: status_tick,
                status,
            } => {
                let road = status.road.clone();
                if !self.roads.contains(&road) {
                    warn!("Status from unknown road '{}' ignored", road);
                    return;
                }
                if self.offline.contains(&road) {
                    return;
                }

                let newer = self
                    .latest
                    .get(&road)
                    .map(|last| status_tick >= last.tick)
                    .unwrap_or(true);
                if newer {
                    let last = LastStatus {
                        tick: status_tick,
                        received: self.clock.now(),
                        status,
                    };
                    self.latest.insert(road.clone(), last);
                }
                if status_tick == tick {
                    pending.remove(&road);
                } else {
                    debug!(
                        "[{}] late status for tick {} during tick {}",
                        road, status_tick, tick
                    );
                }
            }
            RoadMessage::Exhausted { road } => {
                if self.exhausted.insert(road.clone()) {
                    info!("🏁 [{}] Frame source exhausted", road);
                }
            }
            RoadMessage::Offline { road, reason } => {
                pending.remove(&road);
                self.mark_offline(&road, &reason);
            }
        }
    }
}
