// src/config.rs
//
// Loading and validation of config.yaml. Everything here runs once before any
// worker starts; any error is fatal.

use crate::topology::{JunctionShape, JunctionTopology};
use crate::types::{Config, RoadConfig};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "JUNCTION_CONFIG";
pub const SHAPE_ENV: &str = "JUNCTION_TYPE";
pub const LOG_FILTER_ENV: &str = "JUNCTION_LOG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Config path: first CLI argument, then `JUNCTION_CONFIG`, then `config.yaml`.
pub fn config_path(cli_arg: Option<String>, env_value: Option<String>) -> PathBuf {
    cli_arg
        .or(env_value)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply the `JUNCTION_TYPE` override, if one was given.
    pub fn apply_shape_override(&mut self, shape: Option<&str>) -> Result<()> {
        let Some(raw) = shape.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        let shape: JunctionShape = raw
            .parse()
            .with_context(|| format!("Invalid {} value", SHAPE_ENV))?;
        if shape != self.junction.shape {
            info!(
                "Junction shape overridden by {}: {} -> {}",
                SHAPE_ENV, self.junction.shape, shape
            );
        }
        self.junction.shape = shape;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(secs) = self.approach.alert_hold_secs {
            if !secs.is_finite() || secs <= 0.0 {
                bail!("approach.alert_hold_secs must be a positive number, got {}", secs);
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                bail!("approach.alert_hold_secs is out of range, got {}", secs);
            }
        }
        self.approach
            .resolve()
            .validate()
            .context("Invalid approach settings")?;

        let topology = JunctionTopology::for_shape(self.junction.shape);
        let mut seen = HashSet::new();
        for road in &self.roads {
            let name = road.name.trim().to_ascii_uppercase();
            if !topology.has_road(&name) {
                bail!(
                    "Unknown road '{}' for a {} junction (expected one of {:?})",
                    road.name,
                    topology.shape(),
                    topology.roads()
                );
            }
            if !seen.insert(name) {
                bail!("Road '{}' is configured more than once", road.name);
            }
        }

        let p = &self.pipeline;
        if p.tick_interval_ms == 0 {
            bail!("pipeline.tick_interval_ms must be greater than zero");
        }
        if p.status_timeout_ms == 0 {
            bail!("pipeline.status_timeout_ms must be greater than zero");
        }
        if p.frame_skip == 0 {
            bail!("pipeline.frame_skip must be at least 1");
        }
        if p.shutdown_timeout_ms == 0 {
            bail!("pipeline.shutdown_timeout_ms must be greater than zero");
        }

        let d = &self.detector;
        if !(0.0..=1.0).contains(&d.min_confidence) {
            bail!(
                "detector.min_confidence must be within [0, 1], got {}",
                d.min_confidence
            );
        }
        if d.vehicle_classes.is_empty() {
            bail!("detector.vehicle_classes must name at least one class");
        }

        Ok(())
    }

    /// Roads to run, in the junction's canonical order with upper-case names.
    /// No configured roads means every road of the shape.
    pub fn active_roads(&self, topology: &JunctionTopology) -> Vec<RoadConfig> {
        topology
            .roads()
            .iter()
            .filter_map(|canonical| {
                if self.roads.is_empty() {
                    return Some(RoadConfig {
                        name: canonical.to_string(),
                        source: None,
                    });
                }
                self.roads
                    .iter()
                    .find(|r| r.name.trim().eq_ignore_ascii_case(canonical))
                    .map(|r| RoadConfig {
                        name: canonical.to_string(),
                        source: r.source.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("junction:\n  shape: four_way\n");
        config.validate().unwrap();
        assert_eq!(config.junction.shape, JunctionShape::FourWay);
        assert_eq!(config.pipeline.frame_skip, 1);
        assert_eq!(config.detector.min_confidence, 0.4);

        let approach = config.approach.resolve();
        assert_eq!(approach.approach_frames_required, 2);
        assert_eq!(approach.alert_hold, Duration::from_secs(6));
    }

    #[test]
    fn test_profile_with_field_override() {
        let config = parse(
            "junction:\n  shape: T_JUNCTION\napproach:\n  profile: single_road\n  alert_hold_secs: 3.5\n",
        );
        config.validate().unwrap();
        let approach = config.approach.resolve();
        assert_eq!(approach.approach_frames_required, 1);
        assert_eq!(approach.near_field_threshold, 200.0);
        assert_eq!(approach.alert_hold, Duration::from_millis(3500));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            "junction:\n  shape: four_way\napproach:\n  alert_hold_secs: -1.0\n",
            "junction:\n  shape: four_way\napproach:\n  alert_hold_secs: 1.0e20\n",
            "junction:\n  shape: four_way\napproach:\n  approach_frames_required: 0\n",
            "junction:\n  shape: four_way\npipeline:\n  frame_skip: 0\n",
            "junction:\n  shape: four_way\ndetector:\n  min_confidence: 1.5\n",
            "junction:\n  shape: t_junction\nroads:\n  - name: SOUTH\n",
            "junction:\n  shape: four_way\nroads:\n  - name: EAST\n  - name: east\n",
        ];
        for yaml in bad {
            assert!(parse(yaml).validate().is_err(), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_unknown_shape_fails_to_parse() {
        assert!(serde_yaml::from_str::<Config>("junction:\n  shape: roundabout\n").is_err());
    }

    #[test]
    fn test_shape_override() {
        let mut config = parse("junction:\n  shape: four_way\n");
        config.apply_shape_override(Some("Y_JUNCTION")).unwrap();
        assert_eq!(config.junction.shape, JunctionShape::YJunction);

        config.apply_shape_override(None).unwrap();
        assert_eq!(config.junction.shape, JunctionShape::YJunction);

        assert!(config.apply_shape_override(Some("star")).is_err());
    }

    #[test]
    fn test_active_roads_follow_canonical_order() {
        let config = parse(
            "junction:\n  shape: four_way\nroads:\n  - name: west\n  - name: EAST\n    source: cams/east.jsonl\n",
        );
        let topology = JunctionTopology::for_shape(config.junction.shape);
        let roads = config.active_roads(&topology);
        assert_eq!(roads.len(), 2);
        assert_eq!(roads[0].name, "EAST");
        assert_eq!(roads[0].source, Some(PathBuf::from("cams/east.jsonl")));
        assert_eq!(roads[1].name, "WEST");

        let all = parse("junction:\n  shape: y_junction\n").active_roads(
            &JunctionTopology::for_shape(JunctionShape::YJunction),
        );
        let names: Vec<_> = all.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["LEFT", "RIGHT", "MAIN"]);
    }

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(
            config_path(Some("a.yaml".into()), Some("b.yaml".into())),
            PathBuf::from("a.yaml")
        );
        assert_eq!(config_path(None, Some("b.yaml".into())), PathBuf::from("b.yaml"));
        assert_eq!(config_path(None, None), PathBuf::from("config.yaml"));
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let err = Config::load(Path::new("/nonexistent/junction.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/junction.yaml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "junction:\n  shape: t_junction").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.junction.shape, JunctionShape::TJunction);
    }
}
