// src/led_board.rs
//
// Text rendition of the junction LED dashboard. One panel per movement:
// WARNING when any road threatening that movement is alerting, SAFE
// otherwise, with the direction arrows of the active threats.

use crate::pipeline::Snapshot;
use crate::topology::{threat_arrow, JunctionTopology};
use crate::types::{JunctionSignal, SignalColor};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Receives every tick's snapshot and signal. Must return quickly.
pub trait Renderer: Send {
    fn render(&mut self, snapshot: &Snapshot, signal: &JunctionSignal);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Safe,
    Warning,
}

impl PanelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Warning => "WARNING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panel {
    pub movement: &'static str,
    pub state: PanelState,
    pub threats: Vec<&'static str>,
}

impl Panel {
    pub fn threat_text(&self) -> String {
        if self.threats.is_empty() {
            "-".to_string()
        } else {
            self.threats.join(" ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    pub signal: SignalColor,
    pub direction: Option<String>,
    pub panels: Vec<Panel>,
}

pub struct LedBoard {
    topology: Arc<JunctionTopology>,
    last_view: Option<BoardView>,
}

impl LedBoard {
    pub fn new(topology: Arc<JunctionTopology>) -> Self {
        Self {
            topology,
            last_view: None,
        }
    }

    pub fn build_view(&self, snapshot: &Snapshot, signal: &JunctionSignal) -> BoardView {
        let alerting: HashSet<&str> = snapshot
            .statuses
            .iter()
            .filter(|s| s.alert)
            .map(|s| s.road.as_str())
            .collect();

        let panels = self
            .topology
            .movements()
            .iter()
            .map(|movement| {
                let threats: Vec<&'static str> = movement
                    .threats
                    .iter()
                    .filter(|road| alerting.contains(**road))
                    .map(|road| threat_arrow(road))
                    .collect();
                Panel {
                    movement: movement.name,
                    state: if threats.is_empty() {
                        PanelState::Safe
                    } else {
                        PanelState::Warning
                    },
                    threats,
                }
            })
            .collect();

        BoardView {
            signal: signal.signal,
            direction: signal.active_direction.clone(),
            panels,
        }
    }
}

impl Renderer for LedBoard {
    fn render(&mut self, snapshot: &Snapshot, signal: &JunctionSignal) {
        let view = self.build_view(snapshot, signal);
        if self.last_view.as_ref() == Some(&view) {
            return;
        }

        info!(
            "🚦 SMART JUNCTION LED BOARD ({}) | signal={} direction={}",
            self.topology.shape(),
            view.signal.as_str(),
            view.direction.as_deref().unwrap_or("-")
        );
        for panel in &view.panels {
            match panel.state {
                PanelState::Safe => info!(
                    "   🟢 {:<15} {:<8} Threat: {}",
                    panel.movement,
                    panel.state.as_str(),
                    panel.threat_text()
                ),
                PanelState::Warning => warn!(
                    "   🟡 {:<15} {:<8} Threat: {}",
                    panel.movement,
                    panel.state.as_str(),
                    panel.threat_text()
                ),
            }
        }

        self.last_view = Some(view);
    }
}
