// src/analysis/mod.rs
//
// Approach detection and junction fusion.
//
// Signal flow:
//   Detections → track_store → approach_detector (+ alert_latch) → RoadStatus ─┐
//   Detections → track_store → approach_detector (+ alert_latch) → RoadStatus ─┼→ risk_fusion → JunctionSignal
//   ...one approach_detector per road                                          ─┘

pub mod alert_latch;
pub mod approach_detector;
pub mod risk_fusion;
pub mod track_store;

pub use approach_detector::{ApproachConfig, ApproachDetector};
pub use risk_fusion::RiskFusion;
