// src/topology.rs
//
// Static junction shapes. Each shape fixes:
//   - the canonical road order (also the fusion tie-break order)
//   - the blind-road set eligible for fused alerting
//   - which roads threaten which movement, for the LED board

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JunctionShape {
    #[serde(alias = "FOUR_WAY")]
    FourWay,
    #[serde(alias = "T_JUNCTION")]
    TJunction,
    #[serde(alias = "Y_JUNCTION")]
    YJunction,
}

impl JunctionShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FourWay => "FOUR_WAY",
            Self::TJunction => "T_JUNCTION",
            Self::YJunction => "Y_JUNCTION",
        }
    }
}

impl fmt::Display for JunctionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JunctionShape {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "four_way" => Ok(Self::FourWay),
            "t_junction" => Ok(Self::TJunction),
            "y_junction" => Ok(Self::YJunction),
            other => bail!(
                "unknown junction shape '{}' (expected four_way, t_junction or y_junction)",
                other
            ),
        }
    }
}

/// A maneuver through the junction and the roads whose traffic endangers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub name: &'static str,
    pub threats: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct JunctionTopology {
    shape: JunctionShape,
    roads: Vec<&'static str>,
    blind_roads: Vec<&'static str>,
    movements: Vec<Movement>,
}

impl JunctionTopology {
    pub fn for_shape(shape: JunctionShape) -> Self {
        let (roads, movements): (Vec<&'static str>, Vec<(&'static str, Vec<&'static str>)>) =
            match shape {
                JunctionShape::FourWay => (
                    vec!["NORTH", "SOUTH", "EAST", "WEST"],
                    vec![
                        ("NORTH TO SOUTH", vec!["EAST", "WEST"]),
                        ("SOUTH TO NORTH", vec!["EAST", "WEST"]),
                        ("EAST TO WEST", vec!["NORTH", "SOUTH"]),
                        ("WEST TO EAST", vec!["NORTH", "SOUTH"]),
                    ],
                ),
                JunctionShape::TJunction => (
                    vec!["NORTH", "EAST", "WEST"],
                    vec![
                        ("NORTH TO SOUTH", vec!["EAST", "WEST"]),
                        ("EAST TO WEST", vec!["NORTH"]),
                        ("WEST TO EAST", vec!["NORTH"]),
                    ],
                ),
                JunctionShape::YJunction => (
                    vec!["LEFT", "RIGHT", "MAIN"],
                    vec![
                        ("LEFT BRANCH", vec!["RIGHT"]),
                        ("RIGHT BRANCH", vec!["LEFT"]),
                        ("MAIN ROAD", vec!["LEFT", "RIGHT"]),
                    ],
                ),
            };

        // Every road of a supported shape is visually obstructed
        let blind_roads = roads.clone();

        Self {
            shape,
            roads,
            blind_roads,
            movements: movements
                .into_iter()
                .map(|(name, threats)| Movement { name, threats })
                .collect(),
        }
    }

    pub fn shape(&self) -> JunctionShape {
        self.shape
    }

    /// Roads in canonical order.
    pub fn roads(&self) -> &[&'static str] {
        &self.roads
    }

    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn has_road(&self, road: &str) -> bool {
        self.roads.iter().any(|r| *r == road)
    }

    pub fn is_blind(&self, road: &str) -> bool {
        self.blind_roads.iter().any(|r| *r == road)
    }

    /// Position in canonical order; unknown roads sort last.
    pub fn road_rank(&self, road: &str) -> usize {
        self.roads
            .iter()
            .position(|r| *r == road)
            .unwrap_or(usize::MAX)
    }
}

/// Direction label shown to drivers for a threatening road.
pub fn threat_arrow(road: &str) -> &'static str {
    match road {
        "EAST" => "RIGHT",
        "WEST" => "LEFT",
        "NORTH" => "UP",
        "SOUTH" => "DOWN",
        "LEFT" => "LEFT",
        "RIGHT" => "RIGHT",
        "MAIN" => "AHEAD",
        _ => "?",
    }
}
