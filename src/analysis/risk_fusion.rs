// src/analysis/risk_fusion.rs
//
// Junction-wide fusion of per-road statuses into one signal.
//
//   risk = vehicle_count + (200 - min_distance) / 20 + speed_score
//
// Only blind roads take part. The highest risk wins; equal scores go to the
// road that comes first in the topology's canonical order, so the snapshot's
// ordering never changes the answer. Stateless: smoothing is the job of each
// road's alert latch.

use crate::topology::JunctionTopology;
use crate::types::{JunctionSignal, RoadStatus, MAX_DISTANCE};
use std::sync::Arc;

const DISTANCE_DIVISOR: f32 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RoadRisk {
    pub road: String,
    pub risk: f32,
    pub vehicle_term: f32,
    pub proximity_term: f32,
    pub speed_term: f32,
}

pub struct RiskFusion {
    topology: Arc<JunctionTopology>,
}

impl RiskFusion {
    pub fn new(topology: Arc<JunctionTopology>) -> Self {
        Self { topology }
    }

    pub fn risk_score(status: &RoadStatus) -> f32 {
        Self::breakdown(status).risk
    }

    pub fn breakdown(status: &RoadStatus) -> RoadRisk {
        let vehicle_term = status.vehicle_count as f32;
        let proximity_term = (MAX_DISTANCE - status.min_distance) / DISTANCE_DIVISOR;
        let speed_term = status.speed_score;
        RoadRisk {
            road: status.road.clone(),
            risk: vehicle_term + proximity_term + speed_term,
            vehicle_term,
            proximity_term,
            speed_term,
        }
    }

    /// Risk breakdown of every alerting blind road, highest first. Ties keep
    /// canonical road order.
    pub fn score(&self, snapshot: &[RoadStatus]) -> Vec<RoadRisk> {
        let mut scored: Vec<(usize, RoadRisk)> = snapshot
            .iter()
            .filter(|s| s.alert && self.topology.is_blind(&s.road))
            .map(|s| (self.topology.road_rank(&s.road), Self::breakdown(s)))
            .collect();

        scored.sort_by(|(rank_a, a), (rank_b, b)| {
            b.risk
                .partial_cmp(&a.risk)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(rank_a.cmp(rank_b))
        });

        scored.into_iter().map(|(_, r)| r).collect()
    }

    pub fn evaluate(&self, snapshot: &[RoadStatus]) -> JunctionSignal {
        let mut best: Option<(usize, &RoadStatus, f32)> = None;

        for status in snapshot {
            if !status.alert || !self.topology.is_blind(&status.road) {
                continue;
            }
            let risk = Self::risk_score(status);
            let rank = self.topology.road_rank(&status.road);

            let wins = match best {
                None => true,
                Some((best_rank, _, best_risk)) => {
                    risk > best_risk || (risk == best_risk && rank < best_rank)
                }
            };
            if wins {
                best = Some((rank, status, risk));
            }
        }

        match best {
            Some((_, status, _)) => JunctionSignal::yellow(status.road.clone()),
            None => JunctionSignal::green(),
        }
    }
}
