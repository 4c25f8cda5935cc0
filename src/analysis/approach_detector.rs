// src/analysis/approach_detector.rs
//
// Per-road approach detection. One instance per camera, owning its own
// track memory, alert latch and clock, so roads never share state.
//
// Per frame:
//   detections → track store (debounced growth) → approaching tracks
//   → distance / speed proxies → near-field approach event → alert latch
//   → RoadStatus
//
// Distance and speed are calibration-style proxies derived from bbox height,
// not physical measurements.

use super::alert_latch::AlertLatch;
use super::track_store::TrackStore;
use crate::clock::Clock;
use crate::types::{Detection, RoadStatus, MAX_DISTANCE, MIN_DISTANCE};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ApproachConfig {
    /// Approach counter level at which a track counts as approaching
    pub approach_frames_required: u32,
    /// Bbox height growth (px per frame) that counts as "getting closer"
    pub growth_threshold_px: f32,
    /// How long an alert stays latched after the last approach event
    pub alert_hold: Duration,
    /// distance = 200 - height * distance_scale
    pub distance_scale: f32,
    /// speed = height growth / speed_scale
    pub speed_scale: f32,
    /// An approaching track closer than this raises an approach event
    pub near_field_threshold: f32,
    /// Ticks a track may go unseen before it is forgotten
    pub track_ttl_ticks: u64,
}

impl Default for ApproachConfig {
    fn default() -> Self {
        Self {
            approach_frames_required: 2,
            growth_threshold_px: 3.0,
            alert_hold: Duration::from_secs(6),
            distance_scale: 0.8,
            speed_scale: 5.0,
            near_field_threshold: 195.0,
            track_ttl_ticks: 30,
        }
    }
}

impl ApproachConfig {
    /// Single service-road deployment: confirms on one frame, shorter hold,
    /// and any approaching vehicle triggers regardless of distance.
    pub fn single_road() -> Self {
        Self {
            approach_frames_required: 1,
            alert_hold: Duration::from_secs(2),
            near_field_threshold: MAX_DISTANCE,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.approach_frames_required == 0 {
            bail!("approach_frames_required must be at least 1");
        }
        if !self.growth_threshold_px.is_finite() || self.growth_threshold_px < 0.0 {
            bail!(
                "growth_threshold_px must be a non-negative number, got {}",
                self.growth_threshold_px
            );
        }
        if self.alert_hold.is_zero() {
            bail!("alert hold time must be greater than zero");
        }
        if !self.distance_scale.is_finite() || self.distance_scale <= 0.0 {
            bail!("distance_scale must be positive, got {}", self.distance_scale);
        }
        if !self.speed_scale.is_finite() || self.speed_scale <= 0.0 {
            bail!("speed_scale must be positive, got {}", self.speed_scale);
        }
        if !(self.near_field_threshold > MIN_DISTANCE && self.near_field_threshold <= MAX_DISTANCE)
        {
            bail!(
                "near_field_threshold must be in ({}, {}], got {}",
                MIN_DISTANCE,
                MAX_DISTANCE,
                self.near_field_threshold
            );
        }
        if self.track_ttl_ticks == 0 {
            bail!("track_ttl_ticks must be at least 1");
        }
        Ok(())
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// What the detector concluded about one detection this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAssessment {
    pub track_id: u32,
    pub bbox: [f32; 4],
    pub is_new: bool,
    pub approaching: bool,
    pub distance: Option<f32>,
    pub speed: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub status: RoadStatus,
    pub approach_event: bool,
    pub assessments: Vec<TrackAssessment>,
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct ApproachDetector {
    road: String,
    config: ApproachConfig,
    tracks: TrackStore,
    latch: AlertLatch,
    clock: Arc<dyn Clock>,
    tick: u64,
    last_status: RoadStatus,
}

impl ApproachDetector {
    pub fn new(road: impl Into<String>, config: ApproachConfig, clock: Arc<dyn Clock>) -> Self {
        let road = road.into();
        Self {
            tracks: TrackStore::new(
                config.growth_threshold_px,
                config.approach_frames_required,
                config.track_ttl_ticks,
            ),
            latch: AlertLatch::new(config.alert_hold),
            last_status: RoadStatus::idle(road.clone()),
            road,
            config,
            clock,
            tick: 0,
        }
    }

    pub fn road(&self) -> &str {
        &self.road
    }

    /// Status produced by the most recent frame.
    pub fn status(&self) -> &RoadStatus {
        &self.last_status
    }

    pub fn tracked_count(&self) -> usize {
        self.tracks.len()
    }

    /// Run one frame's detections through the detector. An empty slice is a
    /// normal frame with nothing in it; the latch decides whether a previous
    /// alert still holds.
    pub fn process(&mut self, detections: &[Detection]) -> FrameAnalysis {
        self.tick += 1;
        let now = self.clock.now();

        let mut vehicle_count: u32 = 0;
        let mut min_distance = MAX_DISTANCE;
        let mut max_speed: f32 = 0.0;
        let mut approach_event = false;
        let mut assessments = Vec::with_capacity(detections.len());

        for det in detections {
            let Some(track_id) = det.track_id else {
                continue;
            };
            if !det.is_vehicle() {
                continue;
            }

            vehicle_count += 1;
            let height = det.height();

            let obs = self.tracks.observe(track_id, height, self.tick);
            if obs.is_new {
                assessments.push(TrackAssessment {
                    track_id,
                    bbox: det.bbox,
                    is_new: true,
                    approaching: false,
                    distance: None,
                    speed: None,
                });
                continue;
            }

            self.tracks.update_counter(track_id, height);
            let approaching = self.tracks.is_approaching(track_id);

            let (distance, speed) = if approaching {
                let distance = self.estimate_distance(height);
                let speed = self.estimate_speed(height, obs.prev_height);
                min_distance = min_distance.min(distance);
                max_speed = max_speed.max(speed);

                if distance < self.config.near_field_threshold {
                    approach_event = true;
                }
                (Some(distance), Some(speed))
            } else {
                (None, None)
            };

            assessments.push(TrackAssessment {
                track_id,
                bbox: det.bbox,
                is_new: false,
                approaching,
                distance,
                speed,
            });
        }

        let was_active = self.latch.is_active();
        let latched = self.latch.update(approach_event, now);
        if latched && !was_active {
            info!("⚠️  [{}] Vehicle approaching, alert latched", self.road);
        } else if !latched && was_active {
            info!(
                "✅ [{}] No approach for {:.1}s, alert released",
                self.road,
                self.config.alert_hold.as_secs_f32()
            );
        }

        self.tracks.evict_stale(self.tick);

        let status = RoadStatus {
            road: self.road.clone(),
            alert: latched && vehicle_count > 0,
            vehicle_count,
            min_distance,
            speed_score: max_speed,
        };

        debug!(
            "[{}] tick {}: vehicles={} min_dist={:.1} speed={:.2} event={} latched={}",
            self.road, self.tick, vehicle_count, min_distance, max_speed, approach_event, latched
        );

        self.last_status = status.clone();
        FrameAnalysis {
            status,
            approach_event,
            assessments,
        }
    }

    /// Linear height → distance calibration, clamped to [10, 200].
    fn estimate_distance(&self, bbox_height: f32) -> f32 {
        if bbox_height <= 0.0 {
            return MAX_DISTANCE;
        }
        let dist = MAX_DISTANCE - bbox_height * self.config.distance_scale;
        dist.clamp(MIN_DISTANCE, MAX_DISTANCE)
    }

    /// Relative closing-speed score from bbox growth; never negative.
    fn estimate_speed(&self, current_h: f32, prev_h: f32) -> f32 {
        ((current_h - prev_h) / self.config.speed_scale).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::ObjectClass;

    fn car(track_id: u32, height: f32) -> Detection {
        Detection {
            track_id: Some(track_id),
            bbox: [100.0, 50.0, 160.0, 50.0 + height],
            class: ObjectClass::Vehicle,
            class_name: "car".to_string(),
            confidence: 0.8,
        }
    }

    fn detector(config: ApproachConfig) -> (ApproachDetector, ManualClock) {
        let clock = ManualClock::new();
        let det = ApproachDetector::new("EAST", config, Arc::new(clock.clone()));
        (det, clock)
    }

    #[test]
    fn test_new_track_contributes_nothing() {
        let (mut det, _) = detector(ApproachConfig::default());
        let out = det.process(&[car(1, 120.0)]);

        assert_eq!(out.status.vehicle_count, 1);
        assert_eq!(out.status.min_distance, MAX_DISTANCE);
        assert_eq!(out.status.speed_score, 0.0);
        assert!(!out.status.alert);
        assert!(out.assessments[0].is_new);
    }

    #[test]
    fn test_approaching_vehicle_raises_alert() {
        let (mut det, clock) = detector(ApproachConfig::default());

        det.process(&[car(1, 40.0)]);
        clock.advance(Duration::from_millis(33));
        let out = det.process(&[car(1, 45.0)]);
        assert!(!out.status.alert, "one growth frame is not enough");

        clock.advance(Duration::from_millis(33));
        let out = det.process(&[car(1, 50.0)]);
        assert!(out.approach_event);
        assert!(out.status.alert);
        // 200 - 50 * 0.8
        assert_eq!(out.status.min_distance, 160.0);
        // (50 - 45) / 5
        assert_eq!(out.status.speed_score, 1.0);
    }

    #[test]
    fn test_alert_held_across_dropout_then_released() {
        let (mut det, clock) = detector(ApproachConfig::default());
        det.process(&[car(1, 40.0)]);
        det.process(&[car(1, 45.0)]);
        assert!(det.process(&[car(1, 50.0)]).status.alert);

        // Vehicle still visible but no longer growing: latch holds
        clock.advance(Duration::from_secs(3));
        let out = det.process(&[car(1, 50.0)]);
        assert!(out.status.alert);

        clock.advance(Duration::from_secs(3));
        assert!(det.process(&[car(1, 50.0)]).status.alert);

        clock.advance(Duration::from_millis(10));
        assert!(!det.process(&[car(1, 50.0)]).status.alert);
    }

    #[test]
    fn test_empty_frame_reports_no_alert_but_keeps_latch() {
        let (mut det, clock) = detector(ApproachConfig::default());
        det.process(&[car(1, 40.0)]);
        det.process(&[car(1, 45.0)]);
        assert!(det.process(&[car(1, 50.0)]).status.alert);

        clock.advance(Duration::from_millis(100));
        let out = det.process(&[]);
        assert_eq!(out.status.vehicle_count, 0);
        assert!(!out.status.alert, "alert requires at least one vehicle");
        assert_eq!(out.status.min_distance, MAX_DISTANCE);

        // Vehicle reappears inside the hold window: alert is back
        clock.advance(Duration::from_millis(100));
        assert!(det.process(&[car(1, 50.0)]).status.alert);
    }

    #[test]
    fn test_far_vehicle_does_not_trigger_near_field() {
        let (mut det, _) = detector(ApproachConfig::default());
        // Heights under 6.25px map to distances above 195
        det.process(&[car(1, 0.0)]);
        det.process(&[car(1, 3.1)]);
        let out = det.process(&[car(1, 6.2)]);
        assert!(out.assessments[0].approaching);
        assert!(!out.approach_event);
        assert!(!out.status.alert);
        assert!(out.status.min_distance > 195.0);
    }

    #[test]
    fn test_skips_untracked_and_non_vehicle() {
        let (mut det, _) = detector(ApproachConfig::default());
        let mut untracked = car(1, 80.0);
        untracked.track_id = None;
        let mut person = car(2, 80.0);
        person.class = ObjectClass::Other;
        person.class_name = "person".to_string();

        let out = det.process(&[untracked, person]);
        assert_eq!(out.status.vehicle_count, 0);
        assert!(out.assessments.is_empty());
        assert_eq!(det.tracked_count(), 0);
    }

    #[test]
    fn test_outputs_stay_in_range() {
        let (mut det, clock) = detector(ApproachConfig::single_road());
        let heights = [
            10.0, 400.0, 900.0, 2.0, -50.0, 0.0, 30.0, 600.0, 1500.0, 1499.0, 20.0,
        ];
        for h in heights {
            clock.advance(Duration::from_millis(33));
            let out = det.process(&[car(1, h), car(2, h * 0.5)]);
            assert!(out.status.min_distance >= MIN_DISTANCE);
            assert!(out.status.min_distance <= MAX_DISTANCE);
            assert!(out.status.speed_score >= 0.0);
        }
    }

    #[test]
    fn test_distance_clamps_at_minimum() {
        let (mut det, _) = detector(ApproachConfig::single_road());
        det.process(&[car(1, 200.0)]);
        let out = det.process(&[car(1, 400.0)]);
        assert_eq!(out.status.min_distance, MIN_DISTANCE);
        assert_eq!(out.status.speed_score, 40.0);
    }

    #[test]
    fn test_one_shot_track_is_evicted() {
        let config = ApproachConfig {
            track_ttl_ticks: 3,
            ..ApproachConfig::default()
        };
        let (mut det, _) = detector(config);

        let out = det.process(&[car(42, 100.0)]);
        assert_eq!(out.status.min_distance, MAX_DISTANCE);
        assert_eq!(det.tracked_count(), 1);

        for _ in 0..2 {
            let out = det.process(&[]);
            assert_eq!(out.status.min_distance, MAX_DISTANCE);
            assert_eq!(out.status.speed_score, 0.0);
        }
        assert_eq!(det.tracked_count(), 1);
        // third consecutive miss
        det.process(&[]);
        assert_eq!(det.tracked_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ApproachConfig::default().validate().is_ok());
        assert!(ApproachConfig::single_road().validate().is_ok());

        let bad = [
            ApproachConfig {
                approach_frames_required: 0,
                ..ApproachConfig::default()
            },
            ApproachConfig {
                speed_scale: 0.0,
                ..ApproachConfig::default()
            },
            ApproachConfig {
                near_field_threshold: 250.0,
                ..ApproachConfig::default()
            },
            ApproachConfig {
                alert_hold: Duration::ZERO,
                ..ApproachConfig::default()
            },
            ApproachConfig {
                growth_threshold_px: f32::NAN,
                ..ApproachConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }
}
