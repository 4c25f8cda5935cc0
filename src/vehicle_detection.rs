// src/vehicle_detection.rs

use crate::frame_source::Frame;
use crate::types::{DetectorConfig, Detection, ObjectClass};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Detector shared by every road worker. Implementations must be safe to
/// call from several workers at once.
pub trait DetectionService: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Detector that can only handle one frame at a time.
pub trait FrameDetector: Send {
    fn detect_frame(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Turns a non-concurrent detector into a shared service by queueing callers
/// on a mutex.
pub struct SerializedDetector<D: FrameDetector> {
    inner: Mutex<D>,
}

impl<D: FrameDetector> SerializedDetector<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<D: FrameDetector> DetectionService for SerializedDetector<D> {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detector = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned by a panicking worker"))?;
        detector.detect_frame(frame)
    }
}

/// Applies the deployment's class and confidence filter to tracker output
/// recorded in a replay.
pub struct ReplayDetector {
    min_confidence: f32,
    vehicle_classes: HashSet<String>,
}

impl ReplayDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            vehicle_classes: config
                .vehicle_classes
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        }
    }

    fn classify(&self, class_name: &str) -> ObjectClass {
        if self
            .vehicle_classes
            .contains(&class_name.to_ascii_lowercase())
        {
            ObjectClass::Vehicle
        } else {
            ObjectClass::Other
        }
    }
}

impl DetectionService for ReplayDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections: Vec<Detection> = frame
            .detections
            .iter()
            .filter(|raw| raw.confidence >= self.min_confidence)
            .filter(|raw| raw.bbox.iter().all(|v| v.is_finite()))
            .map(|raw| Detection {
                track_id: raw.track_id,
                bbox: raw.bbox,
                class: self.classify(&raw.class_name),
                class_name: raw.class_name.clone(),
                confidence: raw.confidence,
            })
            .collect();

        debug!(
            "Frame {}: {} of {} detections kept",
            frame.index,
            detections.len(),
            frame.detections.len()
        );
        Ok(detections)
    }
}

impl FrameDetector for ReplayDetector {
    fn detect_frame(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        DetectionService::detect(self, frame)
    }
}

pub fn build_detector(config: &DetectorConfig) -> Arc<dyn DetectionService> {
    let detector = ReplayDetector::new(config);
    if config.serialize_access {
        info!("✓ Detector ready (serialized access)");
        Arc::new(SerializedDetector::new(detector))
    } else {
        info!("✓ Detector ready (concurrent access)");
        Arc::new(detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::RawDetection;

    fn raw(track_id: Option<u32>, class: &str, confidence: f32) -> RawDetection {
        RawDetection {
            track_id,
            bbox: [0.0, 0.0, 40.0, 30.0],
            class_name: class.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_filters_confidence_and_classifies() {
        let detector = ReplayDetector::new(&DetectorConfig::default());
        let frame = Frame {
            index: 1,
            detections: vec![
                raw(Some(1), "car", 0.9),
                raw(Some(2), "Truck", 0.5),
                raw(Some(3), "person", 0.9),
                raw(Some(4), "bus", 0.2),
                raw(None, "car", 0.9),
            ],
        };

        let dets = detector.detect(&frame).unwrap();
        assert_eq!(dets.len(), 4);
        assert_eq!(dets[0].class, ObjectClass::Vehicle);
        assert_eq!(dets[1].class, ObjectClass::Vehicle);
        assert_eq!(dets[2].class, ObjectClass::Other);
        assert_eq!(dets[3].track_id, None);
    }

    #[test]
    fn test_drops_non_finite_boxes() {
        let detector = ReplayDetector::new(&DetectorConfig::default());
        let mut bad = raw(Some(1), "car", 0.9);
        bad.bbox[3] = f32::NAN;
        let frame = Frame {
            index: 1,
            detections: vec![bad],
        };
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_serialized_detector_shared_across_threads() {
        let service = build_detector(&DetectorConfig::default());
        let frame = Frame {
            index: 7,
            detections: vec![raw(Some(1), "car", 0.9)],
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let frame = frame.clone();
                std::thread::spawn(move || service.detect(&frame).unwrap().len())
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 1);
        }
    }
}
