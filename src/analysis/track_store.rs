// src/analysis/track_store.rs
//
// Per-road memory of tracked objects: last bbox height plus a leaky-bucket
// approach counter. Growth beyond the threshold fills the bucket by one,
// anything else drains it by one (saturating at zero), so a single noisy
// frame cannot flip a track while a sustained growth trend can.
//
// Tracks the detector stops reporting are evicted after `ttl_ticks` so a
// long-running stream with tracker id churn keeps bounded memory.

use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackState {
    pub last_height: f32,
    pub approach_counter: u32,
    pub last_seen_tick: u64,
}

/// Result of looking a track up for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub is_new: bool,
    pub prev_height: f32,
}

pub struct TrackStore {
    tracks: HashMap<u32, TrackState>,
    growth_threshold_px: f32,
    frames_required: u32,
    ttl_ticks: u64,
}

impl TrackStore {
    pub fn new(growth_threshold_px: f32, frames_required: u32, ttl_ticks: u64) -> Self {
        Self {
            tracks: HashMap::new(),
            growth_threshold_px,
            frames_required,
            ttl_ticks,
        }
    }

    /// Record that `track_id` is visible this tick. A first sighting inserts
    /// the track with an empty counter and reports `is_new`; the caller must
    /// not classify it yet since one height says nothing about a trend.
    pub fn observe(&mut self, track_id: u32, bbox_height: f32, tick: u64) -> Observation {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                track.last_seen_tick = tick;
                Observation {
                    is_new: false,
                    prev_height: track.last_height,
                }
            }
            None => {
                self.tracks.insert(
                    track_id,
                    TrackState {
                        last_height: bbox_height,
                        approach_counter: 0,
                        last_seen_tick: tick,
                    },
                );
                Observation {
                    is_new: true,
                    prev_height: bbox_height,
                }
            }
        }
    }

    /// Fill or drain the approach bucket and remember `bbox_height` as the
    /// new previous height. Returns the updated counter, or `None` for an
    /// unknown track.
    pub fn update_counter(&mut self, track_id: u32, bbox_height: f32) -> Option<u32> {
        let threshold = self.growth_threshold_px;
        let track = self.tracks.get_mut(&track_id)?;

        if bbox_height > track.last_height + threshold {
            track.approach_counter = track.approach_counter.saturating_add(1);
        } else {
            track.approach_counter = track.approach_counter.saturating_sub(1);
        }
        track.last_height = bbox_height;

        Some(track.approach_counter)
    }

    pub fn is_approaching(&self, track_id: u32) -> bool {
        self.tracks
            .get(&track_id)
            .map(|t| t.approach_counter >= self.frames_required)
            .unwrap_or(false)
    }

    /// Drop tracks that have gone unseen for `ttl_ticks` consecutive ticks.
    pub fn evict_stale(&mut self, current_tick: u64) -> usize {
        let ttl = self.ttl_ticks;
        let before = self.tracks.len();
        self.tracks
            .retain(|_, t| current_tick.saturating_sub(t.last_seen_tick) < ttl);

        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!("🗑️  Evicted {} stale track(s)", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(frames_required: u32) -> TrackStore {
        TrackStore::new(3.0, frames_required, 30)
    }

    #[test]
    fn test_first_sighting_is_new() {
        let mut s = store(2);
        let obs = s.observe(7, 40.0, 1);
        assert!(obs.is_new);
        assert!(!s.is_approaching(7));

        let obs = s.observe(7, 45.0, 2);
        assert!(!obs.is_new);
        assert_eq!(obs.prev_height, 40.0);
    }

    #[test]
    fn test_sustained_growth_becomes_approaching() {
        let mut s = store(2);
        s.observe(1, 40.0, 0);

        s.observe(1, 44.0, 1);
        assert_eq!(s.update_counter(1, 44.0), Some(1));
        assert!(!s.is_approaching(1));

        s.observe(1, 48.5, 2);
        assert_eq!(s.update_counter(1, 48.5), Some(2));
        assert!(s.is_approaching(1));
    }

    #[test]
    fn test_growth_at_threshold_does_not_count() {
        let mut s = store(1);
        s.observe(1, 40.0, 0);
        s.observe(1, 43.0, 1);
        // exactly +3px is not "faster than" the threshold
        assert_eq!(s.update_counter(1, 43.0), Some(0));
        assert!(!s.is_approaching(1));
    }

    #[test]
    fn test_non_increasing_run_drains_counter_to_zero() {
        let mut s = store(3);
        let mut h = 40.0;
        s.observe(1, h, 0);
        for tick in 1..=3 {
            h += 5.0;
            s.observe(1, h, tick);
            s.update_counter(1, h);
        }
        assert!(s.is_approaching(1));

        for tick in 4..=6 {
            s.observe(1, h, tick);
            s.update_counter(1, h);
        }
        assert!(!s.is_approaching(1));

        // saturates rather than wrapping
        s.observe(1, h - 10.0, 7);
        assert_eq!(s.update_counter(1, h - 10.0), Some(0));

        // one growth step from an empty bucket
        h -= 10.0;
        s.observe(1, h + 5.0, 8);
        assert_eq!(s.update_counter(1, h + 5.0), Some(1));
    }

    #[test]
    fn test_single_noisy_frame_does_not_flip() {
        let mut s = store(2);
        s.observe(1, 40.0, 0);
        for (tick, h) in [(1, 41.0), (2, 50.0), (3, 50.5), (4, 51.0)] {
            s.observe(1, h, tick);
            s.update_counter(1, h);
            assert!(!s.is_approaching(1), "tick {} flipped", tick);
        }
    }

    #[test]
    fn test_update_unknown_track() {
        let mut s = store(1);
        assert_eq!(s.update_counter(99, 10.0), None);
        assert!(!s.is_approaching(99));
    }

    #[test]
    fn test_eviction_after_ttl() {
        let mut s = TrackStore::new(3.0, 1, 5);
        s.observe(1, 40.0, 0);
        s.observe(2, 40.0, 0);

        for tick in 1..=4 {
            s.observe(2, 40.0, tick);
            assert_eq!(s.evict_stale(tick), 0);
        }
        // track 1 has now missed ticks 1..=5
        s.observe(2, 40.0, 5);
        assert_eq!(s.evict_stale(5), 1);
        assert_eq!(s.update_counter(1, 40.0), None);
        assert!(s.update_counter(2, 40.0).is_some());
    }
}
