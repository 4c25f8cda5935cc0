// src/frame_source.rs
//
// Per-road frame sources. Frames come from replay files holding the
// per-frame output of an external detector + tracker run, one JSON object
// per line:
//
//   {"frame": 12, "detections": [{"track_id": 4, "bbox": [x1,y1,x2,y2], "class": "car", "confidence": 0.81}]}
//
// Lines are untrusted: a malformed line is logged and yields an empty frame.

use crate::types::RoadConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const REPLAY_EXTENSIONS: [&str; 2] = ["jsonl", "ndjson"];

/// One detection exactly as recorded by the upstream tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub track_id: Option<u32>,
    pub bbox: [f32; 4],
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    #[serde(default)]
    frame: Option<u64>,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub struct ReplayReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    pub frames_read: u64,
    pub malformed_lines: u64,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening replay: {}", path.display());
        let file = File::open(path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            frames_read: 0,
            malformed_lines: 0,
        })
    }
}

impl FrameSource for ReplayReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(line) = self.lines.next() else {
                debug!(
                    "Replay {} finished: {} frame(s), {} malformed",
                    self.path.display(),
                    self.frames_read,
                    self.malformed_lines
                );
                return Ok(None);
            };
            let line =
                line.with_context(|| format!("Failed to read {}", self.path.display()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            self.frames_read += 1;
            let fallback_index = self.frames_read;

            return match serde_json::from_str::<FrameRecord>(trimmed) {
                Ok(record) => Ok(Some(Frame {
                    index: record.frame.unwrap_or(fallback_index),
                    detections: record.detections,
                })),
                Err(e) => {
                    self.malformed_lines += 1;
                    warn!(
                        "Malformed replay line {} in {}: {}",
                        fallback_index,
                        self.path.display(),
                        e
                    );
                    Ok(Some(Frame {
                        index: fallback_index,
                        detections: Vec::new(),
                    }))
                }
            };
        }
    }
}

/// Finds replay files for roads that have no explicit `source`.
pub struct ReplayLocator {
    input_dir: PathBuf,
}

impl ReplayLocator {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    /// Replay files under `input_dir`, keyed by upper-cased file stem.
    pub fn find_replay_files(&self) -> HashMap<String, PathBuf> {
        let mut found = HashMap::new();

        if !self.input_dir.exists() {
            debug!("Replay directory {} does not exist", self.input_dir.display());
            return found;
        }

        for entry in WalkDir::new(&self.input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_replay = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| REPLAY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_replay {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found
                    .entry(stem.to_ascii_uppercase())
                    .or_insert_with(|| path.to_path_buf());
            }
        }

        info!(
            "Found {} replay file(s) in {}",
            found.len(),
            self.input_dir.display()
        );
        found
    }

    /// Source path per road: explicit config first, then discovery.
    pub fn resolve(&self, roads: &[RoadConfig]) -> Vec<(String, Option<PathBuf>)> {
        let discovered = self.find_replay_files();
        roads
            .iter()
            .map(|road| {
                let path = road
                    .source
                    .clone()
                    .or_else(|| discovered.get(&road.name.to_ascii_uppercase()).cloned());
                (road.name.clone(), path)
            })
            .collect()
    }
}
