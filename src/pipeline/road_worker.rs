// src/pipeline/road_worker.rs
//
// One task per road. The worker owns its frame source and ApproachDetector;
// nothing else touches them. Each announced tick it reads at most one frame,
// runs the shared detector on a blocking thread, and reports the resulting
// status back to the broadcaster.
//
// An exhausted or failed source is dropped and the worker keeps answering
// ticks with empty frames, so a held alert still expires on time. A worker
// that dies outside shutdown is reported offline by its supervisor task.

use super::broadcaster::RoadMessage;
use super::metrics::JunctionMetrics;
use crate::analysis::approach_detector::TrackAssessment;
use crate::analysis::ApproachDetector;
use crate::frame_source::{Frame, FrameSource};
use crate::types::{Detection, RoadStatus};
use crate::vehicle_detection::DetectionService;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Aborts the wrapped task when dropped, so aborting a supervisor also
/// stops the worker it watches.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct RoadWorker {
    road: String,
    source: Option<Box<dyn FrameSource>>,
    detector: Arc<dyn DetectionService>,
    approach: ApproachDetector,
    frame_skip: u64,
    ticks_seen: u64,
    metrics: JunctionMetrics,
    status_tx: mpsc::Sender<RoadMessage>,
}

impl RoadWorker {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Arc<dyn DetectionService>,
        approach: ApproachDetector,
        frame_skip: u32,
        metrics: JunctionMetrics,
        status_tx: mpsc::Sender<RoadMessage>,
    ) -> Self {
        Self {
            road: approach.road().to_string(),
            source: Some(source),
            detector,
            approach,
            frame_skip: u64::from(frame_skip.max(1)),
            ticks_seen: 0,
            metrics,
            status_tx,
        }
    }

    /// Spawn the worker under a supervisor. The returned handle belongs to
    /// the supervisor; aborting it aborts the worker too.
    pub fn spawn(
        self,
        tick_rx: watch::Receiver<u64>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let road = self.road.clone();
        let status_tx = self.status_tx.clone();
        let stop_rx = shutdown_rx.clone();
        let task = TaskGuard(tokio::spawn(self.run(tick_rx, shutdown_rx)));
        tokio::spawn(supervise(road, task, status_tx, stop_rx))
    }

    pub async fn run(
        mut self,
        mut tick_rx: watch::Receiver<u64>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("🚀 [{}] Road worker started", self.road);

        if !*shutdown_rx.borrow_and_update() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    changed = tick_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let tick = *tick_rx.borrow_and_update();
                        let status = self.step().await;
                        let msg = RoadMessage::Status { tick, status };
                        if self.status_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        // Release the camera/replay before reporting done
        self.source = None;
        info!("🛑 [{}] Road worker stopped", self.road);
    }

    /// Advance by one tick and return the status to report for it.
    pub async fn step(&mut self) -> RoadStatus {
        self.ticks_seen += 1;
        if (self.ticks_seen - 1) % self.frame_skip != 0 {
            return self.approach.status().clone();
        }

        let detections = match self.next_frame().await {
            Some(frame) => self.detect(frame).await,
            None => Vec::new(),
        };

        let analysis = self.approach.process(&detections);
        for assessment in &analysis.assessments {
            debug!("[{}] {}", self.road, overlay_label(assessment));
        }
        if analysis.approach_event {
            debug!(
                "[{}] approach event ({} track(s) in memory)",
                self.road,
                self.approach.tracked_count()
            );
        }
        analysis.status
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        let source = self.source.as_mut()?;
        let reason = match source.next_frame() {
            Ok(Some(frame)) => return Some(frame),
            Ok(None) => None,
            Err(e) => Some(format!("{:#}", e)),
        };

        match &reason {
            None => info!("🏁 [{}] End of stream, continuing with empty frames", self.road),
            Some(e) => warn!(
                "⚠️  [{}] Frame source failed ({}), continuing with empty frames",
                self.road, e
            ),
        }
        self.source = None;
        let _ = self
            .status_tx
            .send(RoadMessage::Exhausted {
                road: self.road.clone(),
            })
            .await;
        None
    }

    async fn detect(&mut self, frame: Frame) -> Vec<Detection> {
        let detector = Arc::clone(&self.detector);
        let index = frame.index;
        let result = tokio::task::spawn_blocking(move || detector.detect(&frame)).await;

        match result {
            Ok(Ok(detections)) => {
                self.metrics.inc(&self.metrics.frames_processed);
                if detections.is_empty() {
                    self.metrics.inc(&self.metrics.empty_frames);
                }
                debug!(
                    "[{}] frame {}: {} detections",
                    self.road,
                    index,
                    detections.len()
                );
                detections
            }
            Ok(Err(e)) => {
                self.metrics.inc(&self.metrics.detector_failures);
                warn!(
                    "[{}] Detector failed on frame {}: {:#}, treating as empty",
                    self.road, index, e
                );
                Vec::new()
            }
            Err(e) => {
                self.metrics.inc(&self.metrics.detector_failures);
                error!(
                    "❌ [{}] Detector task died on frame {}: {}",
                    self.road, index, e
                );
                Vec::new()
            }
        }
    }
}

async fn supervise(
    road: String,
    mut task: TaskGuard,
    status_tx: mpsc::Sender<RoadMessage>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let reason = match (&mut task.0).await {
        Ok(()) if *shutdown_rx.borrow() => return,
        Ok(()) => "worker stopped before shutdown".to_string(),
        Err(e) if e.is_panic() => format!("worker panicked: {}", e),
        // Cancelled by runtime shutdown
        Err(_) => return,
    };
    let _ = status_tx.send(RoadMessage::Offline { road, reason }).await;
}

/// One-line per-track summary: `ID:<id> D:<distance> S:<speed>` for
/// approaching tracks, the track's state otherwise.
pub fn overlay_label(assessment: &TrackAssessment) -> String {
    let [x1, y1, x2, y2] = assessment.bbox;
    let bbox = format!("[{:.0},{:.0},{:.0},{:.0}]", x1, y1, x2, y2);
    match (assessment.approaching, assessment.distance, assessment.speed) {
        (true, Some(distance), Some(speed)) => format!(
            "ID:{} D:{:.1} S:{:.2} {}",
            assessment.track_id, distance, speed, bbox
        ),
        _ if assessment.is_new => format!("ID:{} new {}", assessment.track_id, bbox),
        _ => format!("ID:{} {}", assessment.track_id, bbox),
    }
}
