use crate::analysis::ApproachConfig;
use crate::topology::JunctionShape;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound of the distance proxy; also the value reported when nothing approaches.
pub const MAX_DISTANCE: f32 = 200.0;
/// Lower bound of the distance proxy.
pub const MIN_DISTANCE: f32 = 10.0;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub junction: JunctionConfig,
    /// Roads to run. Empty means every road of the selected junction shape.
    #[serde(default)]
    pub roads: Vec<RoadConfig>,
    #[serde(default)]
    pub approach: ApproachSection,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JunctionConfig {
    pub shape: JunctionShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadConfig {
    pub name: String,
    /// Replay file for this road. When absent the file is looked up in
    /// `sources.input_dir` by road name.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachProfile {
    /// Multi-road junction deployment: 2 confirm frames, 6s hold, near-field 195.
    #[default]
    Junction,
    /// Single service-road deployment: 1 confirm frame, 2s hold, any approach triggers.
    SingleRoad,
}

/// Approach parameters as written in the config file: a preset plus
/// optional per-field overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproachSection {
    pub profile: ApproachProfile,
    pub approach_frames_required: Option<u32>,
    pub growth_threshold_px: Option<f32>,
    pub alert_hold_secs: Option<f64>,
    pub distance_scale: Option<f32>,
    pub speed_scale: Option<f32>,
    pub near_field_threshold: Option<f32>,
    pub track_ttl_ticks: Option<u64>,
}

impl ApproachSection {
    pub fn resolve(&self) -> ApproachConfig {
        let base = match self.profile {
            ApproachProfile::Junction => ApproachConfig::default(),
            ApproachProfile::SingleRoad => ApproachConfig::single_road(),
        };

        ApproachConfig {
            approach_frames_required: self
                .approach_frames_required
                .unwrap_or(base.approach_frames_required),
            growth_threshold_px: self.growth_threshold_px.unwrap_or(base.growth_threshold_px),
            // Non-finite or negative values are caught by validate(); keep the preset here
            alert_hold: self
                .alert_hold_secs
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .unwrap_or(base.alert_hold),
            distance_scale: self.distance_scale.unwrap_or(base.distance_scale),
            speed_scale: self.speed_scale.unwrap_or(base.speed_scale),
            near_field_threshold: self
                .near_field_threshold
                .unwrap_or(base.near_field_threshold),
            track_ttl_ticks: self.track_ttl_ticks.unwrap_or(base.track_ttl_ticks),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_confidence: f32,
    /// Class names counted as vehicles (COCO: car, motorcycle, bus, truck)
    pub vehicle_classes: Vec<String>,
    /// Guard the detector behind a mutex when it is not safe to call concurrently
    pub serialize_access: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            vehicle_classes: ["car", "motorcycle", "bus", "truck"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            serialize_access: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_interval_ms: u64,
    /// How long a tick waits for a road's status before reusing the previous one
    pub status_timeout_ms: u64,
    /// Process one frame every N ticks per road
    pub frame_skip: u32,
    pub shutdown_timeout_ms: u64,
    /// End the run once every road's source is exhausted or offline
    pub stop_when_exhausted: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33, // ~30 FPS
            status_timeout_ms: 33,
            frame_skip: 1,
            shutdown_timeout_ms: 2000,
            stop_when_exhausted: true,
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub input_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("replays"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive
    pub level: String,
    pub record_path: PathBuf,
    pub records_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "junction_safety=info".to_string(),
            record_path: PathBuf::from("logs/run_log.jsonl"),
            records_enabled: true,
        }
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Vehicle,
    Other,
}

/// One tracked object in one frame, as handed over by the detector service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Tracker identity; `None` when the tracker has not assigned one yet
    pub track_id: Option<u32>,
    pub bbox: [f32; 4], // [x1, y1, x2, y2] pixels
    pub class: ObjectClass,
    pub class_name: String,
    pub confidence: f32,
}

impl Detection {
    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn is_vehicle(&self) -> bool {
        self.class == ObjectClass::Vehicle
    }
}

// ============================================================================
// ROAD / JUNCTION OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadStatus {
    pub road: String,
    pub alert: bool,
    pub vehicle_count: u32,
    pub min_distance: f32,
    pub speed_score: f32,
}

impl RoadStatus {
    /// Status of a road with nothing on it.
    pub fn idle(road: impl Into<String>) -> Self {
        Self {
            road: road.into(),
            alert: false,
            vehicle_count: 0,
            min_distance: MAX_DISTANCE,
            speed_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalColor {
    Green,
    Yellow,
}

impl SignalColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JunctionSignal {
    pub signal: SignalColor,
    pub active_direction: Option<String>,
}

impl JunctionSignal {
    pub fn green() -> Self {
        Self {
            signal: SignalColor::Green,
            active_direction: None,
        }
    }

    pub fn yellow(direction: impl Into<String>) -> Self {
        Self {
            signal: SignalColor::Yellow,
            active_direction: Some(direction.into()),
        }
    }

    pub fn direction_name(&self) -> &str {
        self.active_direction.as_deref().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_overrides_single_fields() {
        let section = ApproachSection {
            profile: ApproachProfile::SingleRoad,
            alert_hold_secs: Some(4.5),
            ..Default::default()
        };
        let resolved = section.resolve();

        assert_eq!(resolved.approach_frames_required, 1);
        assert_eq!(resolved.alert_hold, Duration::from_secs_f64(4.5));
        assert_eq!(resolved.near_field_threshold, MAX_DISTANCE);
    }

    #[test]
    fn test_default_profile_is_junction() {
        let resolved = ApproachSection::default().resolve();
        assert_eq!(resolved.approach_frames_required, 2);
        assert_eq!(resolved.alert_hold, Duration::from_secs(6));
        assert_eq!(resolved.near_field_threshold, 195.0);
    }

    #[test]
    fn test_detection_height() {
        let det = Detection {
            track_id: Some(1),
            bbox: [10.0, 20.0, 50.0, 80.0],
            class: ObjectClass::Vehicle,
            class_name: "car".to_string(),
            confidence: 0.9,
        };
        assert_eq!(det.height(), 60.0);
        assert!(det.is_vehicle());
    }
}
