// src/analysis/alert_latch.rs
//
// Latch-with-timeout for a road's alert. An approach event turns the alert
// on and restarts the hold timer; the alert only drops once a full hold
// period has passed with no event. Bridges occlusions and single missed
// frames without needing continuous re-triggering.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AlertLatch {
    hold: Duration,
    active: bool,
    last_event: Option<Instant>,
}

impl AlertLatch {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            active: false,
            last_event: None,
        }
    }

    /// Feed this tick's approach event flag. Returns whether the latch is held.
    pub fn update(&mut self, event: bool, now: Instant) -> bool {
        if event {
            self.active = true;
            self.last_event = Some(now);
        } else if let Some(last) = self.last_event {
            if now.saturating_duration_since(last) > self.hold {
                self.active = false;
            }
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
